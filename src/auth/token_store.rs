//! Bearer token storage.
//!
//! Tokens are issued by the OAuth2 password grant and looked up by the
//! authorization resolver when a request carries no session identity.

use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use rand::{Rng, distributions::Alphanumeric};

use crate::models::AccessToken;

/// Length of generated access and refresh tokens.
pub const TOKEN_LENGTH: usize = 30;

pub type TokenStoreResult<T> = Result<T, TokenStoreError>;

#[derive(Debug, thiserror::Error)]
pub enum TokenStoreError {
    #[error("Token store unavailable: {0}")]
    Unavailable(String),

    #[error("Token already exists")]
    Duplicate,
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Look up a token.
    ///
    /// Unknown and expired tokens both yield `Ok(None)`. An error means the
    /// store itself failed.
    async fn get_token(&self, token: &str) -> TokenStoreResult<Option<AccessToken>>;

    async fn store(&self, token: AccessToken) -> TokenStoreResult<()>;

    /// Remove a token. Returns whether it existed.
    async fn revoke(&self, token: &str) -> TokenStoreResult<bool>;

    /// Drop expired tokens. Returns how many were removed.
    async fn cleanup(&self) -> TokenStoreResult<usize>;
}

/// In-memory token store. Tokens are lost on restart.
#[derive(Default)]
pub struct MemoryTokenStore {
    tokens: DashMap<String, AccessToken>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get_token(&self, token: &str) -> TokenStoreResult<Option<AccessToken>> {
        Ok(self
            .tokens
            .get(token)
            .filter(|t| !t.is_expired())
            .map(|t| t.value().clone()))
    }

    async fn store(&self, token: AccessToken) -> TokenStoreResult<()> {
        match self.tokens.entry(token.token.clone()) {
            Entry::Occupied(_) => Err(TokenStoreError::Duplicate),
            Entry::Vacant(slot) => {
                slot.insert(token);
                Ok(())
            }
        }
    }

    async fn revoke(&self, token: &str) -> TokenStoreResult<bool> {
        Ok(self.tokens.remove(token).is_some())
    }

    async fn cleanup(&self) -> TokenStoreResult<usize> {
        let before = self.tokens.len();
        self.tokens.retain(|_, t| !t.is_expired());
        let removed = before.saturating_sub(self.tokens.len());
        if removed > 0 {
            tracing::debug!(removed, "Removed expired access tokens");
        }
        Ok(removed)
    }
}

/// Generate a random alphanumeric token.
pub fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}
