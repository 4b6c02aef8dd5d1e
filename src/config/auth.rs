use serde::{Deserialize, Serialize};

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// Lifetime of access tokens issued by the password grant, in seconds.
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,

    /// How often expired tokens and sessions are purged.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Browser session settings.
    #[serde(default)]
    pub session: SessionConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: default_token_ttl(),
            cleanup_interval_secs: default_cleanup_interval(),
            session: SessionConfig::default(),
        }
    }
}

impl AuthConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.token_ttl_secs == 0 {
            return Err("auth.token_ttl_secs must be greater than 0".into());
        }
        if self.cleanup_interval_secs == 0 {
            return Err("auth.cleanup_interval_secs must be greater than 0".into());
        }
        self.session.validate()
    }
}

fn default_token_ttl() -> u64 {
    3600
}

fn default_cleanup_interval() -> u64 {
    300
}

/// Session cookie configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Name of the session cookie.
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    /// Session lifetime in seconds.
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: u64,

    /// Mark the cookie `Secure` (HTTPS only).
    #[serde(default = "default_true")]
    pub secure: bool,

    #[serde(default)]
    pub same_site: SameSite,

    /// How many users one session may "log in as" at the same time.
    #[serde(default = "default_login_as_max")]
    pub login_as_max: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            ttl_secs: default_session_ttl(),
            secure: true,
            same_site: SameSite::default(),
            login_as_max: default_login_as_max(),
        }
    }
}

impl SessionConfig {
    fn validate(&self) -> Result<(), String> {
        if self.cookie_name.is_empty()
            || !self
                .cookie_name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            return Err(format!(
                "auth.session.cookie_name '{}' must be non-empty and contain only letters, digits, '_' or '-'",
                self.cookie_name
            ));
        }
        if self.ttl_secs == 0 {
            return Err("auth.session.ttl_secs must be greater than 0".into());
        }
        if self.same_site == SameSite::None && !self.secure {
            return Err("auth.session.same_site = \"none\" requires secure = true".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SameSite {
    #[default]
    Lax,
    Strict,
    None,
}

fn default_cookie_name() -> String {
    "kommet_session".to_string()
}

fn default_session_ttl() -> u64 {
    8 * 60 * 60 // 8 hours
}

fn default_login_as_max() -> usize {
    3
}

fn default_true() -> bool {
    true
}
