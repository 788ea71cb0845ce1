//! Session authentication for the dashboard API
//!
//! Keeps the access token in memory, the refresh token in the Credential
//! Store, and refreshes transparently around authenticated requests.

pub mod clock;
mod commands;
mod error;
mod manager;
pub mod refresh;
pub mod tokens;

pub use clock::{Clock, ManualClock, SystemClock};
pub use commands::{login, logout, refresh_now, status, LoginArgs};
pub use error::AuthError;
pub use manager::{InitializationGuard, SessionStatus, SessionTokenManager};
pub use tokens::{AccessToken, TokenState};
