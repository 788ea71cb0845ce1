//! Response envelope used by the dashboard API

use serde::Deserialize;

/// `{ success, data, message }` wrapper around every API response body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiEnvelope {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub message: Option<String>,
    /// Error text of framework-generated refusals (`{"detail": "..."}`).
    #[serde(default)]
    pub detail: Option<String>,
}

impl ApiEnvelope {
    /// Parse a body leniently; anything that is not an envelope yields the default.
    pub fn parse(body: &[u8]) -> Self {
        serde_json::from_slice(body).unwrap_or_default()
    }

    pub fn is_failure(&self) -> bool {
        self.success == Some(false)
    }

    /// Human-readable error text, preferring `message` over `detail`.
    pub fn error_text(&self) -> Option<&str> {
        self.message.as_deref().or(self.detail.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_failure_envelope() {
        let env = ApiEnvelope::parse(br#"{"success":false,"message":"Invalid refresh token"}"#);
        assert!(env.is_failure());
        assert_eq!(env.message.as_deref(), Some("Invalid refresh token"));
    }

    #[test]
    fn test_error_text_falls_back_to_detail() {
        let env = ApiEnvelope::parse(br#"{"detail":"Not authenticated"}"#);
        assert_eq!(env.error_text(), Some("Not authenticated"));

        let env = ApiEnvelope::parse(br#"{"message":"first","detail":"second"}"#);
        assert_eq!(env.error_text(), Some("first"));
    }

    #[test]
    fn test_parse_non_json() {
        let env = ApiEnvelope::parse(b"<html>502 Bad Gateway</html>");
        assert!(!env.is_failure());
        assert!(env.data.is_none());
    }
}
