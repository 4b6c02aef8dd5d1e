//! Environment-scoped directory services consumed by the authorization layer.
//!
//! - [`UserDirectory`]: password authentication and identity loading by user ID
//! - [`PermissionService`]: effective type and action permissions of an identity
//! - [`CascadeSettingsService`]: per-identity settings resolved through the
//!   user → group → locale → profile → environment hierarchy

mod cascade;
mod permissions;
mod users;

pub use cascade::{CascadeSettingsService, MemoryCascadeSettings, SettingScope, SettingValue};
pub use permissions::{MemoryPermissionService, PermissionService, ProfileGrants};
pub use users::{MemoryUserDirectory, UserDirectory, UserRecord, hash_password};

pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// Failure of a directory backend. Absence of a record is never an error.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("Directory unavailable: {0}")]
    Unavailable(String),

    #[error("Inconsistent directory data: {0}")]
    Inconsistent(String),
}
