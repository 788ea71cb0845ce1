//! Session token lifecycle for the content-approval dashboard API
//!
//! Keeps an in-memory access token and a cookie-style durable refresh
//! token, refreshes before expiry, shares one refresh among concurrent
//! callers, and retries a request once after a 401.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod storage;

pub use api::{ApiClient, HttpRequest, HttpResponse, ReqwestTransport, Transport};
pub use auth::{AuthError, SessionTokenManager, TokenState};
pub use config::{Config, SessionOptions};
pub use models::UserProfile;
