//! Configuration and credential storage locations

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::api::ReqwestTransport;
use crate::auth::SessionTokenManager;
use crate::storage::{CookiePolicy, FileStore};

const DEFAULT_BASE_URL: &str = "http://localhost:8000";
const REFRESH_PATH: &str = "/api/v1/auth/refresh";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Dashboard API base URL
    pub base_url: String,
    /// Skip all token handling (local development without a backend)
    pub bypass_auth: bool,
    /// Per-request timeout for API and refresh calls
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            bypass_auth: false,
            request_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Get config directory path
    fn config_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "approval-dashboard", "approval-session")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }

    /// Get config file path
    fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from disk
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir).context("Failed to create config directory")?;

        let path = Self::config_path()?;
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, content).context("Failed to write config file")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&path, perms).context("Failed to set config permissions")?;
        }

        Ok(())
    }

    pub fn base_url(&self) -> Result<url::Url> {
        url::Url::parse(&self.base_url)
            .with_context(|| format!("Invalid base_url '{}'", self.base_url))
    }

    /// Credential Store file (refresh token).
    pub fn credentials_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("credentials.toml"))
    }

    /// Local Store file (expiry marker, validity marker, profile).
    pub fn local_store_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("local.toml"))
    }

    /// Manager options derived from this configuration.
    pub fn session_options(&self) -> Result<SessionOptions> {
        let base = self.base_url()?;
        let mut options = SessionOptions::for_base_url(&base);
        options.bypass_auth = self.bypass_auth;
        Ok(options)
    }

    /// Build a manager backed by the on-disk stores and a reqwest transport.
    pub fn open_session(&self) -> Result<SessionTokenManager> {
        let transport = ReqwestTransport::new(Duration::from_secs(self.request_timeout_secs))
            .context("Failed to build HTTP client")?;
        Ok(SessionTokenManager::new(
            self.session_options()?,
            Arc::new(transport),
            Arc::new(FileStore::new(Self::credentials_path()?)),
            Arc::new(FileStore::new(Self::local_store_path()?)),
        ))
    }
}

/// Tunables of [`SessionTokenManager`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Send requests without any token handling.
    pub bypass_auth: bool,
    /// Absolute URL of the refresh endpoint.
    pub refresh_url: String,
    /// Remaining lifetime at or below which a token counts as expiring soon.
    pub expiring_soon_window: chrono::Duration,
    /// Upper bound on how long a request waits for startup restore.
    pub init_wait_timeout: Duration,
    /// Retention window of the refresh token in the Credential Store.
    pub refresh_token_ttl: chrono::Duration,
    /// Lifetime given to synthetic offline/dev credentials.
    pub synthetic_token_ttl: chrono::Duration,
    pub cookie_policy: CookiePolicy,
}

impl SessionOptions {
    pub fn for_base_url(base_url: &url::Url) -> Self {
        Self {
            refresh_url: format!("{}{}", base_url.as_str().trim_end_matches('/'), REFRESH_PATH),
            cookie_policy: CookiePolicy::for_base_url(base_url),
            ..Self::default()
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            bypass_auth: false,
            refresh_url: format!("{}{}", DEFAULT_BASE_URL, REFRESH_PATH),
            expiring_soon_window: chrono::Duration::seconds(60),
            init_wait_timeout: Duration::from_secs(5),
            refresh_token_ttl: chrono::Duration::days(7),
            synthetic_token_ttl: chrono::Duration::hours(1),
            cookie_policy: CookiePolicy::local(),
        }
    }
}
