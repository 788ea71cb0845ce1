//! Durable key-value stores backing the session
//!
//! The refresh token lives in a cookie-like Credential Store with a
//! retention window and security attributes. The expiry marker, validity
//! marker and cached user profile live in a plain Local Store. Both are
//! reached through [`KeyValueStore`].

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Credential Store key for the refresh token.
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";
/// Local Store key for the access token expiry (ms since epoch, stringified).
pub const TOKEN_EXPIRY_KEY: &str = "tokenExpiryTime";
/// Local Store key for the access token validity marker.
pub const ACCESS_TOKEN_MARKER_KEY: &str = "accessTokenHash";
/// Local Store key for the cached user profile JSON.
pub const USER_DATA_KEY: &str = "userData";

#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    #[error("failed to read store {path}: {message}")]
    Read { path: String, message: String },
    #[error("failed to write store {path}: {message}")]
    Write { path: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

/// Cookie attributes applied to Credential Store writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookiePolicy {
    pub path: String,
    pub secure: bool,
    pub same_site: SameSite,
}

impl CookiePolicy {
    /// Pick attributes for the deployment that serves `base_url`.
    ///
    /// Loopback hosts and plain HTTP get a relaxed, non-secure policy;
    /// everything served over TLS gets `Secure` + `SameSite=Strict`.
    pub fn for_base_url(base_url: &url::Url) -> Self {
        let local = matches!(
            base_url.host_str(),
            Some("localhost") | Some("127.0.0.1") | Some("[::1]") | Some("::1")
        );
        if base_url.scheme() == "https" && !local {
            Self {
                path: "/".to_string(),
                secure: true,
                same_site: SameSite::Strict,
            }
        } else {
            Self::local()
        }
    }

    pub fn local() -> Self {
        Self {
            path: "/".to_string(),
            secure: false,
            same_site: SameSite::Lax,
        }
    }
}

impl Default for CookiePolicy {
    fn default() -> Self {
        Self::local()
    }
}

#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Retention window. `None` keeps the entry until removed.
    pub max_age: Option<Duration>,
    pub cookie: Option<CookiePolicy>,
}

impl WriteOptions {
    pub fn cookie(policy: CookiePolicy, max_age: Duration) -> Self {
        Self {
            max_age: Some(max_age),
            cookie: Some(policy),
        }
    }
}

/// A single stored value with its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie: Option<CookiePolicy>,
}

impl Entry {
    fn new(value: &str, options: &WriteOptions, now: DateTime<Utc>) -> Self {
        Self {
            value: value.to_string(),
            expires_at: options.max_age.map(|age| now + age),
            cookie: options.cookie.clone(),
        }
    }

    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |exp| now < exp)
    }
}

/// Simple get/set/delete store with optional expiry.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str, options: &WriteOptions) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}
