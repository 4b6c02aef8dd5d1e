mod error;
mod identity;
mod resolver;
pub mod session_store;
pub mod token_store;

pub use error::AuthError;
pub use identity::{DEFAULT_LOCALE, Identity};
pub use resolver::{AuthorizationResolver, AuthorizationResult, Authorized, IdentitySource};
pub use session_store::{
    LogoutOutcome, MemorySessionStore, Session, SessionContext, SessionError, SessionStore,
};
pub use token_store::{
    MemoryTokenStore, TokenStore, TokenStoreError, TokenStoreResult, generate_token,
};
