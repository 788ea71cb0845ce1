//! Access token state and expiry decoding

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};

/// Name prefixes used by locally synthesized offline/dev credentials.
/// These are never structurally decoded.
pub const SYNTHETIC_TOKEN_PREFIXES: &[&str] = &["offline_", "dev_", "fallback_"];

/// Why a token's expiry could not be determined.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenDecodeError {
    #[error("expected 3 dot-separated segments, found {0}")]
    Arity(usize),
    #[error("payload is not valid base64url")]
    Encoding,
    #[error("payload is not a JSON object")]
    Payload,
    #[error("payload has no usable exp claim")]
    MissingExpiry,
}

#[derive(Debug, Deserialize)]
struct Claims {
    exp: Option<serde_json::Number>,
}

/// Lifecycle position of the in-memory access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Absent,
    Fresh,
    ExpiringSoon,
    Expired,
}

impl std::fmt::Display for TokenState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TokenState::Absent => "absent",
            TokenState::Fresh => "fresh",
            TokenState::ExpiringSoon => "expiring soon",
            TokenState::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// In-memory access token
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub value: String,
    /// `None` when the token could not be decoded. Treated as expired.
    pub expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &format_args!("<{} chars>", self.value.len()))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl AccessToken {
    /// Build a token, deriving its expiry from the token itself.
    pub fn new(value: String, now: DateTime<Utc>, synthetic_ttl: Duration) -> Self {
        let expires_at = match decode_expiry(&value, now, synthetic_ttl) {
            Ok(exp) => Some(exp),
            Err(e) => {
                tracing::debug!("Access token expiry unknown: {}", e);
                None
            }
        };
        Self { value, expires_at }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(exp) => now >= exp,
            None => true,
        }
    }

    pub fn is_expiring_soon(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match self.expires_at {
            Some(exp) => exp - now <= window,
            None => true,
        }
    }

    pub fn state(&self, now: DateTime<Utc>, window: Duration) -> TokenState {
        if self.is_expired(now) {
            TokenState::Expired
        } else if self.is_expiring_soon(now, window) {
            TokenState::ExpiringSoon
        } else {
            TokenState::Fresh
        }
    }
}

/// True if `token` follows the offline/dev credential naming convention.
pub fn is_synthetic(token: &str) -> bool {
    SYNTHETIC_TOKEN_PREFIXES
        .iter()
        .any(|prefix| token.starts_with(prefix))
}

/// Extract the expiry instant of `token`.
///
/// Synthetic credentials expire `synthetic_ttl` after `now`. Anything else
/// must be a three-segment base64url token whose payload carries a numeric
/// `exp` claim in seconds.
pub fn decode_expiry(
    token: &str,
    now: DateTime<Utc>,
    synthetic_ttl: Duration,
) -> Result<DateTime<Utc>, TokenDecodeError> {
    if is_synthetic(token) {
        return Ok(now + synthetic_ttl);
    }

    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(TokenDecodeError::Arity(segments.len()));
    }

    let payload = URL_SAFE_NO_PAD
        .decode(segments[1].trim_end_matches('='))
        .map_err(|_| TokenDecodeError::Encoding)?;
    let claims: Claims =
        serde_json::from_slice(&payload).map_err(|_| TokenDecodeError::Payload)?;

    let exp = claims.exp.ok_or(TokenDecodeError::MissingExpiry)?;
    let millis = exp
        .as_i64()
        .and_then(|secs| secs.checked_mul(1000))
        .or_else(|| exp.as_f64().map(|secs| (secs * 1000.0) as i64))
        .ok_or(TokenDecodeError::MissingExpiry)?;

    DateTime::from_timestamp_millis(millis).ok_or(TokenDecodeError::MissingExpiry)
}

/// One-way marker proving a token existed, safe to keep in the local store.
pub fn validity_marker(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

#[cfg(test)]
pub(crate) fn make_jwt(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"user-1","exp":{}}}"#, exp));
    format!("{}.{}.signature", header, payload)
}
