use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Kid;

/// An isolated tenant context with its own types, data and users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub id: Kid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Environment {
    pub fn new(id: Kid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            created_at: Utc::now(),
        }
    }
}
