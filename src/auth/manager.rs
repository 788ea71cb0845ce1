//! Session token lifecycle
//!
//! [`SessionTokenManager`] owns the in-memory access token, the durable
//! refresh token and the markers that let a restarted process tell whether
//! a session is worth restoring. It refreshes tokens before they lapse,
//! collapses concurrent refreshes into one network exchange, holds requests
//! back while startup restore is running, and recovers once from a 401.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use reqwest::StatusCode;
use tokio::sync::watch;

use super::clock::{Clock, SystemClock};
use super::refresh;
use super::tokens::{validity_marker, AccessToken, TokenState};
use super::AuthError;
use crate::api::{HttpRequest, HttpResponse, Transport};
use crate::config::SessionOptions;
use crate::models::UserProfile;
use crate::storage::{
    KeyValueStore, StorageError, WriteOptions, ACCESS_TOKEN_MARKER_KEY, REFRESH_TOKEN_KEY,
    TOKEN_EXPIRY_KEY, USER_DATA_KEY,
};

type SharedRefresh = Shared<BoxFuture<'static, Result<String, AuthError>>>;

#[derive(Default)]
struct TokenSlot {
    access: Option<AccessToken>,
    /// The refresh currently in flight. Every concurrent caller awaits a clone.
    in_flight: Option<SharedRefresh>,
}

struct Inner {
    options: SessionOptions,
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn KeyValueStore>,
    local: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    slot: Mutex<TokenSlot>,
    initializing: watch::Sender<bool>,
}

/// Snapshot of the session for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: TokenState,
    pub expires_at: Option<DateTime<Utc>>,
    pub has_refresh_token: bool,
    pub restorable: bool,
    pub bypass_auth: bool,
}

/// Lowers the initialization gate when dropped.
#[must_use = "the gate is lowered as soon as the guard is dropped"]
pub struct InitializationGuard {
    inner: Arc<Inner>,
}

impl Drop for InitializationGuard {
    fn drop(&mut self) {
        self.inner.initializing.send_replace(false);
    }
}

/// Clears the in-flight refresh handle however the refresh task ends.
struct SettleGuard<'a>(&'a Inner);

impl Drop for SettleGuard<'_> {
    fn drop(&mut self) {
        self.0.lock_slot().in_flight = None;
    }
}

impl Inner {
    fn lock_slot(&self) -> MutexGuard<'_, TokenSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn store_access_token(&self, token: Option<String>) -> Result<(), StorageError> {
        let token = token.map(|value| {
            AccessToken::new(value, self.now(), self.options.synthetic_token_ttl)
        });

        let persisted = token
            .as_ref()
            .and_then(|t| t.expires_at.map(|exp| (exp, validity_marker(&t.value))));
        self.lock_slot().access = token;

        match persisted {
            Some((exp, marker)) => {
                let opts = WriteOptions::default();
                self.local
                    .set(TOKEN_EXPIRY_KEY, &exp.timestamp_millis().to_string(), &opts)?;
                self.local.set(ACCESS_TOKEN_MARKER_KEY, &marker, &opts)
            }
            None => {
                self.local.remove(TOKEN_EXPIRY_KEY)?;
                self.local.remove(ACCESS_TOKEN_MARKER_KEY)
            }
        }
    }

    fn store_refresh_token(&self, token: Option<&str>) -> Result<(), StorageError> {
        match token {
            Some(token) => self.credentials.set(
                REFRESH_TOKEN_KEY,
                token,
                &WriteOptions::cookie(
                    self.options.cookie_policy.clone(),
                    self.options.refresh_token_ttl,
                ),
            ),
            None => self.credentials.remove(REFRESH_TOKEN_KEY),
        }
    }

    fn clear_all(&self) {
        self.lock_slot().access = None;
        let results = [
            self.credentials.remove(REFRESH_TOKEN_KEY),
            self.local.remove(TOKEN_EXPIRY_KEY),
            self.local.remove(ACCESS_TOKEN_MARKER_KEY),
            self.local.remove(USER_DATA_KEY),
        ];
        for err in results.into_iter().filter_map(Result::err) {
            tracing::warn!("Failed to clear stored credential: {}", err);
        }
    }

    async fn run_refresh(&self, refresh_token: &str) -> Result<String, AuthError> {
        tracing::info!("Refreshing access token...");

        match refresh::exchange(
            self.transport.as_ref(),
            &self.options.refresh_url,
            refresh_token,
        )
        .await
        {
            Ok(pair) => {
                if let Err(e) = self.store_access_token(Some(pair.access_token.clone())) {
                    tracing::warn!("Failed to persist access token markers: {}", e);
                }
                if let Some(rt) = pair.refresh_token.as_deref() {
                    if let Err(e) = self.store_refresh_token(Some(rt)) {
                        tracing::warn!("Failed to persist rotated refresh token: {}", e);
                    }
                }
                tracing::info!("Access token refreshed");
                Ok(pair.access_token)
            }
            Err(e @ AuthError::RefreshRejected { .. }) => {
                tracing::warn!("Refresh token rejected, clearing credentials: {}", e);
                self.clear_all();
                Err(e)
            }
            Err(e) => {
                tracing::warn!("Token refresh failed, keeping credentials: {}", e);
                Err(e)
            }
        }
    }
}

/// Process-wide owner of the session's tokens.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SessionTokenManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionTokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTokenManager")
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

impl SessionTokenManager {
    pub fn new(
        options: SessionOptions,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn KeyValueStore>,
        local: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self::with_clock(options, transport, credentials, local, Arc::new(SystemClock))
    }

    pub fn with_clock(
        options: SessionOptions,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn KeyValueStore>,
        local: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (initializing, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                options,
                transport,
                credentials,
                local,
                clock,
                slot: Mutex::new(TokenSlot::default()),
                initializing,
            }),
        }
    }

    // --- State queries ---

    /// True if there is no access token, its expiry is unknown, or it has passed.
    pub fn is_token_expired(&self) -> bool {
        let now = self.inner.now();
        self.inner
            .lock_slot()
            .access
            .as_ref()
            .map_or(true, |t| t.is_expired(now))
    }

    /// True if the access token has no known expiry or lapses within the window.
    pub fn is_token_expiring_soon(&self) -> bool {
        let now = self.inner.now();
        let window = self.inner.options.expiring_soon_window;
        self.inner
            .lock_slot()
            .access
            .as_ref()
            .map_or(true, |t| t.is_expiring_soon(now, window))
    }

    pub fn token_state(&self) -> TokenState {
        let now = self.inner.now();
        let window = self.inner.options.expiring_soon_window;
        self.inner
            .lock_slot()
            .access
            .as_ref()
            .map_or(TokenState::Absent, |t| t.state(now, window))
    }

    /// True if durable storage holds a complete, unexpired session: profile,
    /// refresh token, expiry marker and validity marker.
    pub fn has_valid_stored_credential(&self) -> bool {
        let local = &self.inner.local;
        if !local.contains(USER_DATA_KEY)
            || !local.contains(ACCESS_TOKEN_MARKER_KEY)
            || !self.inner.credentials.contains(REFRESH_TOKEN_KEY)
        {
            return false;
        }

        local
            .get(TOKEN_EXPIRY_KEY)
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .map_or(false, |exp_ms| exp_ms > self.inner.now().timestamp_millis())
    }

    pub fn status(&self) -> SessionStatus {
        let expires_at = self
            .inner
            .lock_slot()
            .access
            .as_ref()
            .and_then(|t| t.expires_at);
        SessionStatus {
            state: self.token_state(),
            expires_at,
            has_refresh_token: self.inner.credentials.contains(REFRESH_TOKEN_KEY),
            restorable: self.has_valid_stored_credential(),
            bypass_auth: self.inner.options.bypass_auth,
        }
    }

    // --- Accessors and mutators ---

    pub fn access_token(&self) -> Option<String> {
        self.inner.lock_slot().access.as_ref().map(|t| t.value.clone())
    }

    /// Replace the in-memory access token and its durable expiry/validity markers.
    pub fn set_access_token(&self, token: Option<String>) {
        if let Err(e) = self.inner.store_access_token(token) {
            tracing::warn!("Failed to persist access token markers: {}", e);
        }
    }

    pub fn clear_access_token(&self) {
        self.set_access_token(None);
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.inner.credentials.get(REFRESH_TOKEN_KEY)
    }

    /// Store (with the retention window) or remove the durable refresh token.
    pub fn set_refresh_token(&self, token: Option<&str>) {
        if let Err(e) = self.inner.store_refresh_token(token) {
            tracing::warn!("Failed to persist refresh token: {}", e);
        }
    }

    pub fn clear_refresh_token(&self) {
        self.set_refresh_token(None);
    }

    /// Forget every credential: access token, refresh token, markers, profile.
    pub fn clear_all_credentials(&self) {
        self.inner.clear_all();
    }

    pub fn user_profile(&self) -> Option<UserProfile> {
        let raw = self.inner.local.get(USER_DATA_KEY)?;
        match serde_json::from_str(&raw) {
            Ok(profile) => Some(profile),
            Err(e) => {
                tracing::warn!("Ignoring unreadable cached profile: {}", e);
                None
            }
        }
    }

    pub fn set_user_profile(&self, profile: &UserProfile) -> Result<(), AuthError> {
        let raw = profile.0.to_string();
        self.inner
            .local
            .set(USER_DATA_KEY, &raw, &WriteOptions::default())?;
        Ok(())
    }

    /// Record the outcome of a successful login.
    ///
    /// Replaces the whole durable session: a refresh token or profile left
    /// out here is removed, never inherited from an earlier login.
    pub fn establish_session(
        &self,
        access_token: String,
        refresh_token: Option<&str>,
        profile: Option<&UserProfile>,
    ) -> Result<(), AuthError> {
        self.inner.store_access_token(Some(access_token))?;
        self.inner.store_refresh_token(refresh_token)?;
        match profile {
            Some(profile) => self.set_user_profile(profile)?,
            None => self.inner.local.remove(USER_DATA_KEY)?,
        }
        tracing::info!("Session established ({})", self.token_state());
        Ok(())
    }

    pub fn logout(&self) {
        tracing::info!("Logging out, clearing credentials");
        self.clear_all_credentials();
    }

    // --- Initialization gate ---

    /// Raise the gate that holds authenticated requests back until startup
    /// restore finishes. The gate drops with the returned guard.
    pub fn begin_initialization(&self) -> InitializationGuard {
        self.inner.initializing.send_replace(true);
        InitializationGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn is_initializing(&self) -> bool {
        *self.inner.initializing.borrow()
    }

    /// Restore the session from durable storage at startup.
    ///
    /// Restore failures are logged, not returned; the caller finds out on
    /// its first authenticated request.
    pub async fn initialize(&self) {
        self.restore(self.begin_initialization()).await
    }

    /// Like [`initialize`](Self::initialize), for a gate the caller raised
    /// already, so requests issued before the restore task is polled still
    /// wait for it.
    pub async fn restore(&self, gate: InitializationGuard) {
        let _gate = gate;

        if self.refresh_token().is_none() {
            tracing::debug!("No stored refresh token, starting logged out");
            return;
        }

        if self.has_valid_stored_credential() {
            tracing::info!("Stored session still valid, restoring access token");
        } else {
            tracing::info!("Stored session stale, refreshing");
        }

        match self.refresh_access_token().await {
            Ok(_) => tracing::info!("Session restored"),
            Err(e) => tracing::warn!("Session restore failed: {}", e),
        }
    }

    async fn wait_for_initialization(&self) {
        let mut rx = self.inner.initializing.subscribe();
        let busy = *rx.borrow();
        if !busy {
            return;
        }

        let limit = self.inner.options.init_wait_timeout;
        tracing::debug!("Waiting up to {:?} for session restore", limit);
        let cleared = async move { rx.wait_for(|busy| !*busy).await.is_ok() };
        if tokio::time::timeout(limit, cleared).await.is_err() {
            tracing::warn!("Session restore still running after {:?}, proceeding", limit);
        }
    }

    // --- Refresh ---

    /// Return a usable access token, refreshing it if needed.
    ///
    /// Concurrent calls share one network exchange and all observe its result.
    pub async fn refresh_access_token(&self) -> Result<String, AuthError> {
        self.refresh_inner(None).await
    }

    async fn refresh_inner(&self, rejected: Option<&str>) -> Result<String, AuthError> {
        let pending = {
            let mut slot = self.inner.lock_slot();

            if let Some(pending) = slot.in_flight.as_ref() {
                tracing::debug!("Refresh already in flight, joining it");
                pending.clone()
            } else {
                // A token the server just refused must not satisfy the freshness check.
                if let Some(rejected) = rejected {
                    if slot.access.as_ref().is_some_and(|t| t.value == rejected) {
                        slot.access = None;
                    }
                }

                let now = self.inner.now();
                let window = self.inner.options.expiring_soon_window;
                if let Some(current) = slot.access.as_ref() {
                    if !current.is_expired(now) && !current.is_expiring_soon(now, window) {
                        return Ok(current.value.clone());
                    }
                }

                let refresh_token = self
                    .inner
                    .credentials
                    .get(REFRESH_TOKEN_KEY)
                    .ok_or(AuthError::NoRefreshToken)?;

                let pending = self.spawn_refresh(refresh_token);
                slot.in_flight = Some(pending.clone());
                pending
            }
        };

        pending.await
    }

    /// Run the exchange on its own task so it completes even if every
    /// waiter goes away.
    fn spawn_refresh(&self, refresh_token: String) -> SharedRefresh {
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let _settle = SettleGuard(&inner);
            inner.run_refresh(&refresh_token).await
        });

        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(AuthError::RefreshTransport(format!(
                    "refresh task did not complete: {}",
                    e
                ))),
            }
        }
        .boxed()
        .shared()
    }

    // --- Authenticated requests ---

    fn usable_access_token(&self) -> Option<String> {
        let now = self.inner.now();
        let window = self.inner.options.expiring_soon_window;
        self.inner
            .lock_slot()
            .access
            .as_ref()
            .filter(|t| !t.is_expired(now) && !t.is_expiring_soon(now, window))
            .map(|t| t.value.clone())
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, AuthError> {
        self.inner
            .transport
            .send(request)
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))
    }

    /// Send `request` with the session's bearer token.
    ///
    /// On a 401 the token is refreshed and the request replayed exactly once.
    /// Other statuses are returned untouched.
    pub async fn authenticated_fetch(&self, request: HttpRequest) -> Result<HttpResponse, AuthError> {
        if self.inner.options.bypass_auth {
            tracing::debug!("Auth bypass: {} {}", request.method, request.url);
            return self.send(request).await;
        }

        self.wait_for_initialization().await;

        let token = match self.usable_access_token() {
            Some(token) => token,
            None => self
                .refresh_access_token()
                .await
                .map_err(|e| AuthError::AuthenticationRequired(Arc::new(e)))?,
        };

        let first = with_bearer(request.clone(), &token)?;
        let response = self.send(first).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        tracing::info!(
            "{} {} returned 401, refreshing and retrying once",
            request.method,
            request.url
        );
        let token = self
            .refresh_inner(Some(&token))
            .await
            .map_err(|e| AuthError::AuthenticationFailed(Arc::new(e)))?;

        self.send(with_bearer(request, &token)?).await
    }
}

fn with_bearer(request: HttpRequest, token: &str) -> Result<HttpRequest, AuthError> {
    request
        .bearer_auth(token)
        .map_err(|e| AuthError::Transport(format!("access token unusable: {}", e)))
}
