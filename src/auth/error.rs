//! Authentication error taxonomy

use std::sync::Arc;

use crate::storage::StorageError;

/// Failures surfaced by the session token manager.
///
/// `Clone` so that every caller waiting on a shared refresh observes the
/// same failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    /// No durable refresh token is present.
    #[error("no refresh token available; log in again")]
    NoRefreshToken,

    /// The refresh exchange could not reach the auth server. Credentials are kept.
    #[error("token refresh failed in transport: {0}")]
    RefreshTransport(String),

    /// The auth server refused the refresh token. Credentials have been cleared.
    #[error("refresh token rejected (HTTP {status}): {message}")]
    RefreshRejected { status: u16, message: String },

    /// The auth server answered with success but no recognizable token.
    #[error("refresh response malformed: {0}")]
    InvalidRefreshResponse(String),

    /// No usable access token could be established before sending a request.
    #[error("authentication required: {0}")]
    AuthenticationRequired(#[source] Arc<AuthError>),

    /// A request was rejected with 401 and the recovery refresh failed too.
    #[error("authentication failed after 401: {0}")]
    AuthenticationFailed(#[source] Arc<AuthError>),

    /// The wrapped request itself failed in transport.
    #[error("request failed: {0}")]
    Transport(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl AuthError {
    /// True for failures after which the caller should treat the user as logged out.
    pub fn requires_login(&self) -> bool {
        match self {
            AuthError::NoRefreshToken
            | AuthError::RefreshRejected { .. }
            | AuthError::AuthenticationFailed(_) => true,
            AuthError::AuthenticationRequired(inner) => inner.requires_login(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_login() {
        assert!(AuthError::NoRefreshToken.requires_login());
        assert!(!AuthError::RefreshTransport("offline".into()).requires_login());
        assert!(
            AuthError::AuthenticationRequired(Arc::new(AuthError::NoRefreshToken))
                .requires_login()
        );
        assert!(!AuthError::AuthenticationRequired(Arc::new(
            AuthError::RefreshTransport("offline".into())
        ))
        .requires_login());
    }

    #[test]
    fn test_display_includes_cause() {
        let err = AuthError::AuthenticationFailed(Arc::new(AuthError::RefreshRejected {
            status: 401,
            message: "token revoked".into(),
        }));
        assert!(err.to_string().contains("token revoked"));
    }
}
