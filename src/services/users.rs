use std::collections::BTreeSet;

use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use super::DirectoryResult;
use crate::{
    auth::Identity,
    models::{Environment, Kid, Profile},
};

/// Loads identities of one environment's users.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Check a username and password. Unknown users, inactive users and wrong
    /// passwords all yield `Ok(None)`.
    async fn authenticate(
        &self,
        username: &str,
        password: &str,
        env: &Environment,
    ) -> DirectoryResult<Option<Identity>>;

    /// Load the identity of a user by ID, without permissions.
    async fn load_identity(&self, user_id: &Kid, env: &Environment)
    -> DirectoryResult<Option<Identity>>;
}

/// A stored user account.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: Kid,
    pub user_name: String,
    /// Hex-encoded SHA-256 of the password.
    pub password_digest: String,
    pub profile: Profile,
    pub roles: BTreeSet<String>,
    pub group_ids: Vec<Kid>,
    pub locale: String,
    pub active: bool,
}

impl UserRecord {
    pub fn new(id: Kid, user_name: impl Into<String>, password: &str, profile: Profile) -> Self {
        Self {
            id,
            user_name: user_name.into(),
            password_digest: hash_password(password),
            profile,
            roles: BTreeSet::new(),
            group_ids: Vec::new(),
            locale: crate::auth::DEFAULT_LOCALE.to_string(),
            active: true,
        }
    }

    fn password_matches(&self, password: &str) -> bool {
        let candidate = hash_password(password);
        candidate
            .as_bytes()
            .ct_eq(self.password_digest.as_bytes())
            .into()
    }

    fn to_identity(&self, env_id: &Kid) -> Identity {
        let mut identity = Identity::new(
            self.id.clone(),
            self.user_name.clone(),
            env_id.clone(),
            self.profile.clone(),
        )
        .with_locale(self.locale.clone())
        .with_groups(self.group_ids.clone());
        identity.roles = self.roles.clone();
        identity
    }
}

/// Hex-encoded SHA-256 digest of a password.
pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// In-memory user directory keyed by environment.
#[derive(Default)]
pub struct MemoryUserDirectory {
    users: DashMap<Kid, Vec<UserRecord>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a user in an environment.
    pub fn insert(&self, env_id: Kid, user: UserRecord) {
        let mut users = self.users.entry(env_id).or_default();
        users.retain(|u| u.id != user.id);
        users.push(user);
    }

    pub fn user_count(&self, env_id: &Kid) -> usize {
        self.users.get(env_id).map(|u| u.len()).unwrap_or(0)
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn authenticate(
        &self,
        username: &str,
        password: &str,
        env: &Environment,
    ) -> DirectoryResult<Option<Identity>> {
        let Some(users) = self.users.get(&env.id) else {
            return Ok(None);
        };
        let identity = users
            .iter()
            .find(|u| u.user_name == username)
            .filter(|u| u.active && u.password_matches(password))
            .map(|u| u.to_identity(&env.id));
        Ok(identity)
    }

    async fn load_identity(
        &self,
        user_id: &Kid,
        env: &Environment,
    ) -> DirectoryResult<Option<Identity>> {
        let identity = self.users.get(&env.id).and_then(|users| {
            users
                .iter()
                .find(|u| &u.id == user_id && u.active)
                .map(|u| u.to_identity(&env.id))
        });
        Ok(identity)
    }
}
