//! Cascade settings.
//!
//! A setting is stored against one context of the cascade hierarchy. For a
//! given identity every key resolves to the value of the most specific context
//! that applies to it, in order user, user group, locale, profile, environment.

use std::collections::BTreeMap;

use async_trait::async_trait;
use dashmap::DashMap;

use super::DirectoryResult;
use crate::{
    auth::Identity,
    models::{Environment, Kid},
};

#[async_trait]
pub trait CascadeSettingsService: Send + Sync {
    async fn settings_for(
        &self,
        identity: &Identity,
        env: &Environment,
    ) -> DirectoryResult<BTreeMap<String, String>>;
}

/// Context a setting value is stored against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingScope {
    Environment,
    Profile(Kid),
    Locale(String),
    UserGroup(Kid),
    User(Kid),
}

impl SettingScope {
    /// Higher wins.
    fn specificity(&self) -> u8 {
        match self {
            Self::Environment => 0,
            Self::Profile(_) => 1,
            Self::Locale(_) => 2,
            Self::UserGroup(_) => 3,
            Self::User(_) => 4,
        }
    }

    fn applies_to(&self, identity: &Identity) -> bool {
        match self {
            Self::Environment => true,
            Self::Profile(id) => identity.profile.id == *id,
            Self::Locale(locale) => identity.locale == *locale,
            Self::UserGroup(id) => identity.group_ids.contains(id),
            Self::User(id) => identity.user_id == *id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingValue {
    pub key: String,
    pub value: String,
    pub scope: SettingScope,
}

impl SettingValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>, scope: SettingScope) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            scope,
        }
    }
}

/// In-memory settings keyed by environment.
#[derive(Default)]
pub struct MemoryCascadeSettings {
    settings: DashMap<Kid, Vec<SettingValue>>,
}

impl MemoryCascadeSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a setting, replacing any value with the same key and scope.
    pub fn set(&self, env_id: Kid, setting: SettingValue) {
        let mut values = self.settings.entry(env_id).or_default();
        values.retain(|s| !(s.key == setting.key && s.scope == setting.scope));
        values.push(setting);
    }
}

#[async_trait]
impl CascadeSettingsService for MemoryCascadeSettings {
    async fn settings_for(
        &self,
        identity: &Identity,
        env: &Environment,
    ) -> DirectoryResult<BTreeMap<String, String>> {
        let Some(values) = self.settings.get(&env.id) else {
            return Ok(BTreeMap::new());
        };

        let mut best: BTreeMap<&str, &SettingValue> = BTreeMap::new();
        for setting in values.iter().filter(|s| s.scope.applies_to(identity)) {
            match best.get(setting.key.as_str()) {
                Some(current) if current.scope.specificity() >= setting.scope.specificity() => {}
                _ => {
                    best.insert(setting.key.as_str(), setting);
                }
            }
        }

        Ok(best
            .into_iter()
            .map(|(k, s)| (k.to_string(), s.value.clone()))
            .collect())
    }
}
