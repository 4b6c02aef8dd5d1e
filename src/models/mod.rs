mod access_token;
mod environment;
mod kid;
mod permission;

pub use access_token::AccessToken;
pub use environment::Environment;
pub use kid::{Kid, KidError};
pub use permission::{PermissionSet, Profile, TypeAccess};
