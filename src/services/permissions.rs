use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::DirectoryResult;
use crate::{
    auth::Identity,
    models::{Environment, Kid, PermissionSet, TypeAccess},
};

/// Computes effective permissions of an identity.
#[async_trait]
pub trait PermissionService: Send + Sync {
    async fn materialize(&self, identity: &Identity, env: &Environment)
    -> DirectoryResult<PermissionSet>;
}

/// Permissions granted to one profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileGrants {
    /// Access flags keyed by type ID.
    #[serde(default)]
    pub types: HashMap<Kid, TypeAccess>,
    /// Action URLs the profile may invoke.
    #[serde(default)]
    pub actions: BTreeSet<String>,
}

/// In-memory grants keyed by `(environment, profile)`.
#[derive(Default)]
pub struct MemoryPermissionService {
    grants: DashMap<(Kid, Kid), ProfileGrants>,
}

impl MemoryPermissionService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, env_id: Kid, profile_id: Kid, grants: ProfileGrants) {
        self.grants.insert((env_id, profile_id), grants);
    }
}

#[async_trait]
impl PermissionService for MemoryPermissionService {
    async fn materialize(
        &self,
        identity: &Identity,
        env: &Environment,
    ) -> DirectoryResult<PermissionSet> {
        let key = (env.id.clone(), identity.profile.id.clone());
        let permissions = self
            .grants
            .get(&key)
            .map(|g| PermissionSet {
                types: g.types.clone(),
                actions: g.actions.clone(),
            })
            .unwrap_or_default();

        tracing::debug!(
            user_id = %identity.user_id,
            env_id = %env.id,
            profile = %identity.profile.name,
            types = permissions.types.len(),
            actions = permissions.actions.len(),
            "Materialized permissions"
        );
        Ok(permissions)
    }
}
