//! User-related models

use serde::{Deserialize, Serialize};

/// Cached profile of the logged-in user.
///
/// The dashboard owns the shape of this document; only a few well-known
/// fields get typed accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserProfile(pub serde_json::Value);

impl UserProfile {
    pub fn id(&self) -> Option<&str> {
        self.str_field("id")
    }

    pub fn email(&self) -> Option<&str> {
        self.str_field("email")
    }

    pub fn display_name(&self) -> Option<&str> {
        self.str_field("name")
            .or_else(|| self.str_field("full_name"))
            .or_else(|| self.str_field("username"))
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.as_str())
    }
}

impl From<serde_json::Value> for UserProfile {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}
