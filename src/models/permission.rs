use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use super::Kid;

/// A named permission group assigned to users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Kid,
    pub name: String,
}

impl Profile {
    /// Implicit super-role: passes every role requirement and permission check.
    pub const ROOT: &'static str = "Root";
    pub const SYSTEM_ADMINISTRATOR: &'static str = "SystemAdministrator";

    pub fn new(id: Kid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.name == Self::ROOT
    }
}

/// Access flags a profile holds on a single type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypeAccess {
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub edit: bool,
    #[serde(default)]
    pub delete: bool,
    #[serde(default)]
    pub create: bool,
    /// Read records regardless of sharing.
    #[serde(default)]
    pub read_all: bool,
    #[serde(default)]
    pub edit_all: bool,
    #[serde(default)]
    pub delete_all: bool,
}

/// Effective permissions of one identity in one environment.
///
/// Computed once per login or token resolution and then read without locking.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
    /// Access flags keyed by type ID.
    pub types: HashMap<Kid, TypeAccess>,
    /// URLs of actions the identity may invoke.
    pub actions: BTreeSet<String>,
}

impl PermissionSet {
    pub fn type_access(&self, type_id: &Kid) -> TypeAccess {
        self.types.get(type_id).copied().unwrap_or_default()
    }

    pub fn can_access_action(&self, url: &str) -> bool {
        self.actions.contains(url)
    }
}
