//! Role gate.
//!
//! Operations declare the roles allowed to run them. The gate runs after the
//! request has been authorized and checks the resolved identity against the
//! requirement. `Root` passes every requirement.

use std::collections::BTreeSet;

use crate::{
    auth::{AuthError, Identity},
    i18n::{ACCESS_DENIED, MessageCatalog},
    models::Profile,
};

/// Message used when no localized text is available.
pub const ACCESS_DENIED_FALLBACK: &str = "Access denied";

/// Set of role names allowed to run an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleRequirement {
    roles: BTreeSet<String>,
    /// Catalog key of the denial message.
    denial_key: &'static str,
}

impl RoleRequirement {
    pub fn any_of<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
            denial_key: ACCESS_DENIED,
        }
    }

    /// Use a different catalog message when denying.
    pub fn with_denial_message(mut self, key: &'static str) -> Self {
        self.denial_key = key;
        self
    }

    /// Only `Root`.
    pub fn root() -> Self {
        Self::any_of([Profile::ROOT])
    }

    /// `Root` or `SystemAdministrator`.
    pub fn admin() -> Self {
        Self::any_of([Profile::ROOT, Profile::SYSTEM_ADMINISTRATOR])
    }

    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.roles.iter().map(String::as_str)
    }

    /// Whether the identity holds a required role or is root.
    pub fn allows(&self, identity: &Identity) -> bool {
        identity.is_root() || identity.role_names().any(|r| self.roles.contains(r))
    }
}

/// Check an identity against a requirement.
///
/// A missing identity is denied with the fallback message; otherwise the
/// requirement's message comes from the catalog in the identity's locale.
pub fn check(
    requirement: &RoleRequirement,
    identity: Option<&Identity>,
    catalog: &MessageCatalog,
) -> Result<(), AuthError> {
    match identity {
        Some(identity) if requirement.allows(identity) => Ok(()),
        Some(identity) => {
            tracing::debug!(
                user_id = %identity.user_id,
                required = ?requirement.roles,
                "Role requirement not met"
            );
            Err(AuthError::AccessDenied {
                message: catalog
                    .get(&identity.locale, requirement.denial_key)
                    .unwrap_or(ACCESS_DENIED_FALLBACK)
                    .to_string(),
            })
        }
        None => Err(AuthError::AccessDenied {
            message: ACCESS_DENIED_FALLBACK.to_string(),
        }),
    }
}
