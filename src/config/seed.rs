//! Seed data loaded into the in-memory stores at startup.
//!
//! ```toml
//! [[seed.environments]]
//! id = "0010000000001"
//! name = "dev"
//!
//! [[seed.environments.profiles]]
//! id = "0060000000001"
//! name = "Root"
//!
//! [[seed.environments.users]]
//! id = "0040000000001"
//! user_name = "admin"
//! password = "${KOMMET_ADMIN_PASSWORD}"
//! profile = "0060000000001"
//!
//! [[seed.environments.settings]]
//! key = "theme"
//! value = "dark"
//! ```

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::{
    models::{Kid, TypeAccess},
    services::SettingScope,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedConfig {
    #[serde(default)]
    pub environments: Vec<EnvironmentSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentSeed {
    pub id: Kid,
    pub name: String,

    #[serde(default)]
    pub profiles: Vec<ProfileSeed>,

    #[serde(default)]
    pub users: Vec<UserSeed>,

    #[serde(default)]
    pub settings: Vec<SettingSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileSeed {
    pub id: Kid,
    pub name: String,

    /// Access flags keyed by type ID.
    #[serde(default)]
    pub types: HashMap<Kid, TypeAccess>,

    /// Action URLs the profile may invoke.
    #[serde(default)]
    pub actions: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserSeed {
    pub id: Kid,
    pub user_name: String,

    /// Plaintext password, hashed on load.
    #[serde(default)]
    pub password: Option<String>,

    /// Hex-encoded SHA-256 of the password.
    #[serde(default)]
    pub password_sha256: Option<String>,

    /// Profile ID; must name a profile of the same environment.
    pub profile: Kid,

    #[serde(default)]
    pub roles: BTreeSet<String>,

    #[serde(default)]
    pub groups: Vec<Kid>,

    #[serde(default)]
    pub locale: Option<String>,

    #[serde(default = "default_true")]
    pub active: bool,
}

impl UserSeed {
    /// Hex SHA-256 digest of the configured password.
    pub fn password_digest(&self) -> Option<String> {
        match (&self.password, &self.password_sha256) {
            (Some(plain), None) => Some(crate::services::hash_password(plain)),
            (None, Some(digest)) => Some(digest.to_ascii_lowercase()),
            _ => None,
        }
    }
}

/// A cascade setting. At most one of `user`, `group`, `locale`, `profile`
/// may be set; with none the value is the environment default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingSeed {
    pub key: String,
    pub value: String,

    #[serde(default)]
    pub user: Option<Kid>,

    #[serde(default)]
    pub group: Option<Kid>,

    #[serde(default)]
    pub locale: Option<String>,

    #[serde(default)]
    pub profile: Option<Kid>,
}

impl SettingSeed {
    pub fn scope(&self) -> Result<SettingScope, String> {
        match (&self.user, &self.group, &self.locale, &self.profile) {
            (None, None, None, None) => Ok(SettingScope::Environment),
            (Some(id), None, None, None) => Ok(SettingScope::User(id.clone())),
            (None, Some(id), None, None) => Ok(SettingScope::UserGroup(id.clone())),
            (None, None, Some(locale), None) => Ok(SettingScope::Locale(locale.clone())),
            (None, None, None, Some(id)) => Ok(SettingScope::Profile(id.clone())),
            _ => Err(format!(
                "setting '{}' may name at most one of user, group, locale, profile",
                self.key
            )),
        }
    }
}

impl SeedConfig {
    pub fn validate(&self) -> Result<(), String> {
        let mut env_ids = HashSet::new();
        for env in &self.environments {
            check_prefix(&env.id, Kid::ENV_PREFIX, "environment")?;
            if !env_ids.insert(&env.id) {
                return Err(format!("duplicate environment ID {}", env.id));
            }
            env.validate()?;
        }
        Ok(())
    }
}

impl EnvironmentSeed {
    fn validate(&self) -> Result<(), String> {
        let mut profile_ids = HashSet::new();
        for profile in &self.profiles {
            check_prefix(&profile.id, Kid::PROFILE_PREFIX, "profile")?;
            if !profile_ids.insert(&profile.id) {
                return Err(format!(
                    "duplicate profile ID {} in environment {}",
                    profile.id, self.id
                ));
            }
        }

        let mut user_ids = HashSet::new();
        let mut user_names = HashSet::new();
        for user in &self.users {
            check_prefix(&user.id, Kid::USER_PREFIX, "user")?;
            if !user_ids.insert(&user.id) || !user_names.insert(&user.user_name) {
                return Err(format!(
                    "duplicate user {} ({}) in environment {}",
                    user.id, user.user_name, self.id
                ));
            }
            if !profile_ids.contains(&user.profile) {
                return Err(format!(
                    "user {} references unknown profile {} in environment {}",
                    user.user_name, user.profile, self.id
                ));
            }
            for group in &user.groups {
                check_prefix(group, Kid::USER_GROUP_PREFIX, "user group")?;
            }
            match user.password_digest() {
                Some(digest) if digest.len() == 64 && hex::decode(&digest).is_ok() => {}
                Some(_) => {
                    return Err(format!(
                        "user {}: password_sha256 must be 64 hex characters",
                        user.user_name
                    ));
                }
                None => {
                    return Err(format!(
                        "user {}: set exactly one of password, password_sha256",
                        user.user_name
                    ));
                }
            }
        }

        for setting in &self.settings {
            setting.scope()?;
        }
        Ok(())
    }
}

fn check_prefix(id: &Kid, prefix: &str, kind: &str) -> Result<(), String> {
    if id.has_prefix(prefix) {
        Ok(())
    } else {
        Err(format!(
            "{kind} ID {id} must start with key prefix {prefix}"
        ))
    }
}

fn default_true() -> bool {
    true
}
