use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::models::{Kid, PermissionSet, Profile, TypeAccess};

/// Default locale for identities that don't carry one.
pub const DEFAULT_LOCALE: &str = "en_US";

/// An authenticated principal scoped to one environment.
///
/// Identities are created at login or token resolution. The permission and
/// cascade-settings caches start empty and are filled by [`Identity::materialize`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: Kid,

    pub user_name: String,

    /// Environment this identity was loaded from.
    pub env_id: Kid,

    pub profile: Profile,

    /// Role names granted in addition to the profile.
    #[serde(default)]
    pub roles: BTreeSet<String>,

    /// User groups the user belongs to (direct and inherited).
    #[serde(default)]
    pub group_ids: Vec<Kid>,

    /// Locale name used for message lookup (e.g. `en_US`).
    #[serde(default = "default_locale")]
    pub locale: String,

    /// Effective permissions, once materialized.
    #[serde(default)]
    pub permissions: Option<PermissionSet>,

    /// Resolved cascade settings, once materialized.
    #[serde(default)]
    pub cascade_settings: Option<BTreeMap<String, String>>,
}

fn default_locale() -> String {
    DEFAULT_LOCALE.to_string()
}

impl Identity {
    pub fn new(user_id: Kid, user_name: impl Into<String>, env_id: Kid, profile: Profile) -> Self {
        Self {
            user_id,
            user_name: user_name.into(),
            env_id,
            profile,
            roles: BTreeSet::new(),
            group_ids: Vec::new(),
            locale: default_locale(),
            permissions: None,
            cascade_settings: None,
        }
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    pub fn with_groups(mut self, group_ids: Vec<Kid>) -> Self {
        self.group_ids = group_ids;
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    /// All role names: the profile name plus any extra roles.
    pub fn role_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.profile.name.as_str()).chain(self.roles.iter().map(String::as_str))
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.role_names().any(|r| r == role)
    }

    pub fn is_root(&self) -> bool {
        self.has_role(Profile::ROOT)
    }

    /// Store computed permissions and cascade settings on this identity.
    pub fn materialize(
        &mut self,
        permissions: PermissionSet,
        cascade_settings: BTreeMap<String, String>,
    ) {
        self.permissions = Some(permissions);
        self.cascade_settings = Some(cascade_settings);
    }

    pub fn is_materialized(&self) -> bool {
        self.permissions.is_some() && self.cascade_settings.is_some()
    }

    /// Access flags on a type. Root holds every flag.
    pub fn type_access(&self, type_id: &Kid) -> TypeAccess {
        if self.is_root() {
            return TypeAccess {
                read: true,
                edit: true,
                delete: true,
                create: true,
                read_all: true,
                edit_all: true,
                delete_all: true,
            };
        }
        self.permissions
            .as_ref()
            .map(|p| p.type_access(type_id))
            .unwrap_or_default()
    }

    pub fn can_access_action(&self, url: &str) -> bool {
        self.is_root()
            || self
                .permissions
                .as_ref()
                .is_some_and(|p| p.can_access_action(url))
    }

    /// A single cascade setting value.
    pub fn setting(&self, key: &str) -> Option<&str> {
        self.cascade_settings
            .as_ref()
            .and_then(|s| s.get(key))
            .map(String::as_str)
    }
}
