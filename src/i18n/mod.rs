//! Localized user-facing messages.

use std::collections::HashMap;

use crate::auth::DEFAULT_LOCALE;

pub const ACCESS_DENIED: &str = "auth.access_denied";
pub const LOGIN_FAILED: &str = "auth.login_failed";
pub const LOGIN_AS_FORBIDDEN: &str = "auth.login_as_forbidden";

const EN_US: &[(&str, &str)] = &[
    (ACCESS_DENIED, "Access denied"),
    (LOGIN_FAILED, "Invalid username or password"),
    (LOGIN_AS_FORBIDDEN, "Only root users can log in as other users"),
];

const PL_PL: &[(&str, &str)] = &[
    (ACCESS_DENIED, "Brak dostępu"),
    (LOGIN_FAILED, "Nieprawidłowa nazwa użytkownika lub hasło"),
    (LOGIN_AS_FORBIDDEN, "Tylko użytkownicy root mogą logować się jako inni użytkownicy"),
];

/// Messages keyed by locale, then by message key.
#[derive(Debug, Clone)]
pub struct MessageCatalog {
    messages: HashMap<String, HashMap<String, String>>,
}

impl Default for MessageCatalog {
    fn default() -> Self {
        let mut catalog = Self {
            messages: HashMap::new(),
        };
        for (locale, entries) in [("en_US", EN_US), ("pl_PL", PL_PL)] {
            for (key, text) in entries {
                catalog.insert(locale, *key, *text);
            }
        }
        catalog
    }
}

impl MessageCatalog {
    /// Catalog with the built-in English and Polish messages.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or override a message.
    pub fn insert(&mut self, locale: &str, key: impl Into<String>, text: impl Into<String>) {
        self.messages
            .entry(locale.to_string())
            .or_default()
            .insert(key.into(), text.into());
    }

    /// Merge a set of messages for one locale.
    pub fn extend(&mut self, locale: &str, entries: &HashMap<String, String>) {
        for (key, text) in entries {
            self.insert(locale, key.clone(), text.clone());
        }
    }

    /// Look up a message, falling back to the default locale.
    pub fn get(&self, locale: &str, key: &str) -> Option<&str> {
        self.lookup(locale, key)
            .or_else(|| self.lookup(DEFAULT_LOCALE, key))
    }

    fn lookup(&self, locale: &str, key: &str) -> Option<&str> {
        self.messages
            .get(locale)
            .and_then(|m| m.get(key))
            .map(String::as_str)
    }

    pub fn has_locale(&self, locale: &str) -> bool {
        self.messages.contains_key(locale)
    }
}
