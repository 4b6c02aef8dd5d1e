use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Extra or overriding messages, keyed by locale then message key.
///
/// ```toml
/// [i18n.messages.de_DE]
/// "auth.access_denied" = "Zugriff verweigert"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct I18nConfig {
    #[serde(default)]
    pub messages: HashMap<String, HashMap<String, String>>,
}
