use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::Kid;

/// A bearer token issued through the OAuth2 password grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub token: String,
    pub refresh_token: String,
    /// Owner of the token.
    pub user_id: Kid,
    /// Environment the owner authenticated against.
    pub env_id: Kid,
    pub issued_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

impl AccessToken {
    pub fn new(
        token: impl Into<String>,
        refresh_token: impl Into<String>,
        user_id: Kid,
        env_id: Kid,
        ttl_secs: u64,
    ) -> Self {
        Self {
            token: token.into(),
            refresh_token: refresh_token.into(),
            user_id,
            env_id,
            issued_at: Utc::now(),
            ttl_secs,
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        i64::try_from(self.ttl_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|ttl| self.issued_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Check if the token has expired.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(ttl_secs: u64) -> AccessToken {
        AccessToken::new(
            "tok",
            "ref",
            Kid::parse("0040000000001").unwrap(),
            Kid::parse("0010000000001").unwrap(),
            ttl_secs,
        )
    }

    #[test]
    fn test_fresh_token_not_expired() {
        assert!(!token(3600).is_expired());
    }

    #[test]
    fn test_zero_ttl_is_expired() {
        assert!(token(0).is_expired());
    }

    #[test]
    fn test_backdated_token_expired() {
        let mut t = token(60);
        t.issued_at = Utc::now() - Duration::seconds(61);
        assert!(t.is_expired());
    }

    #[test]
    fn test_huge_ttl_does_not_overflow() {
        assert!(!token(u64::MAX).is_expired());
    }
}
