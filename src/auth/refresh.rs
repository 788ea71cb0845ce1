//! Refresh-token exchange against the auth server
//!
//! The server is inconsistent about where it expects the refresh token,
//! so the exchange tries `Authorization: Bearer <refresh>` first and, if
//! that is refused for authorization reasons, repeats once with the token
//! in the JSON body.

use reqwest::StatusCode;
use serde_json::json;

use super::AuthError;
use crate::api::{HttpRequest, HttpResponse, Transport};
use crate::models::ApiEnvelope;

/// Field names accepted for the new access token, in priority order.
pub const ACCESS_TOKEN_ALIASES: &[&str] = &["access_token", "accessToken", "token"];
/// Field names accepted for the rotated refresh token, in priority order.
pub const REFRESH_TOKEN_ALIASES: &[&str] = &["refresh_token", "refreshToken"];

/// Tokens issued by a successful refresh.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &format_args!("<redacted>"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Where the refresh token travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convention {
    Header,
    Body,
}

fn build_request(url: &str, refresh_token: &str, convention: Convention) -> Result<HttpRequest, AuthError> {
    let request = HttpRequest::post(url);
    match convention {
        Convention::Header => request
            .bearer_auth(refresh_token)
            .map(|r| r.json(&json!({})))
            .map_err(|e| AuthError::RefreshTransport(e.to_string())),
        Convention::Body => Ok(request.json(&json!({ "refresh_token": refresh_token }))),
    }
}

async fn attempt(
    transport: &dyn Transport,
    url: &str,
    refresh_token: &str,
    convention: Convention,
) -> Result<HttpResponse, AuthError> {
    let request = build_request(url, refresh_token, convention)?;
    transport
        .send(request)
        .await
        .map_err(|e| AuthError::RefreshTransport(e.to_string()))
}

/// Words that mark a 400 as a refusal of the credential itself.
const AUTHORIZATION_HINTS: &[&str] = &["authoriz", "authenticat", "token"];

fn failure_message(response: &HttpResponse) -> String {
    ApiEnvelope::parse(&response.body)
        .error_text()
        .map(String::from)
        .unwrap_or_else(|| {
            response
                .status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string()
        })
}

/// True if the server refused the request because of missing or invalid
/// authorization, as opposed to failing for some other reason.
///
/// Every 401 and 403 counts. A 400 counts when its `message` or `detail`
/// talks about authorization, authentication or the token.
pub fn is_authorization_rejection(response: &HttpResponse) -> bool {
    match response.status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => true,
        StatusCode::BAD_REQUEST => {
            let message = failure_message(response).to_ascii_lowercase();
            AUTHORIZATION_HINTS.iter().any(|hint| message.contains(hint))
        }
        _ => false,
    }
}

fn first_string(data: &serde_json::Value, aliases: &[&str]) -> Option<String> {
    aliases
        .iter()
        .find_map(|key| data.get(*key).and_then(|v| v.as_str()))
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Extract the token pair from a 2xx refresh response body.
pub fn parse_refresh_response(body: &[u8]) -> Result<TokenPair, AuthError> {
    let envelope: ApiEnvelope = serde_json::from_slice(body)
        .map_err(|e| AuthError::InvalidRefreshResponse(format!("body is not JSON: {}", e)))?;

    let data = envelope
        .data
        .ok_or_else(|| AuthError::InvalidRefreshResponse("missing 'data'".to_string()))?;

    let access_token = first_string(&data, ACCESS_TOKEN_ALIASES).ok_or_else(|| {
        AuthError::InvalidRefreshResponse(format!(
            "none of {:?} present in 'data'",
            ACCESS_TOKEN_ALIASES
        ))
    })?;

    Ok(TokenPair {
        access_token,
        refresh_token: first_string(&data, REFRESH_TOKEN_ALIASES),
    })
}

/// Map a final refresh response to a token pair or a typed failure.
fn classify(response: HttpResponse) -> Result<TokenPair, AuthError> {
    let status = response.status;

    if status.is_success() {
        let envelope = ApiEnvelope::parse(&response.body);
        if envelope.is_failure() {
            return Err(AuthError::RefreshRejected {
                status: status.as_u16(),
                message: failure_message(&response),
            });
        }
        return parse_refresh_response(&response.body);
    }

    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        return Err(AuthError::RefreshTransport(format!(
            "auth server returned HTTP {}: {}",
            status.as_u16(),
            failure_message(&response)
        )));
    }

    Err(AuthError::RefreshRejected {
        status: status.as_u16(),
        message: failure_message(&response),
    })
}

/// Exchange `refresh_token` for a new token pair at `url`.
pub async fn exchange(
    transport: &dyn Transport,
    url: &str,
    refresh_token: &str,
) -> Result<TokenPair, AuthError> {
    let mut response = attempt(transport, url, refresh_token, Convention::Header).await?;

    if is_authorization_rejection(&response) {
        tracing::info!(
            "Header refresh refused (HTTP {}), retrying with token in body",
            response.status.as_u16()
        );
        response = attempt(transport, url, refresh_token, Convention::Body).await?;
    }

    classify(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::{json_response, refresh_ok, ScriptedTransport};
    use crate::api::TransportError;
    use reqwest::header::AUTHORIZATION;

    const URL: &str = "http://localhost:8000/api/v1/auth/refresh";

    #[test]
    fn test_parse_accepts_aliases() {
        for (key, rt_key) in [
            ("access_token", "refresh_token"),
            ("accessToken", "refreshToken"),
            ("token", "refresh_token"),
        ] {
            let body = json!({ "success": true, "data": { key: "A", rt_key: "R" } });
            let pair = parse_refresh_response(body.to_string().as_bytes()).unwrap();
            assert_eq!(pair.access_token, "A");
            assert_eq!(pair.refresh_token.as_deref(), Some("R"));
        }
    }

    #[test]
    fn test_parse_prefers_first_alias() {
        let body = json!({ "data": { "token": "third", "access_token": "first" } });
        let pair = parse_refresh_response(body.to_string().as_bytes()).unwrap();
        assert_eq!(pair.access_token, "first");
        assert!(pair.refresh_token.is_none());
    }

    #[test]
    fn test_parse_fails_clearly() {
        let body = json!({ "success": true, "data": { "jwt": "A" } });
        let err = parse_refresh_response(body.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, AuthError::InvalidRefreshResponse(_)));

        let err = parse_refresh_response(br#"{"success":true}"#).unwrap_err();
        assert!(matches!(err, AuthError::InvalidRefreshResponse(_)));

        let err = parse_refresh_response(b"not json").unwrap_err();
        assert!(matches!(err, AuthError::InvalidRefreshResponse(_)));
    }

    #[test]
    fn test_authorization_rejection_detection() {
        assert!(is_authorization_rejection(&json_response(401, json!({}))));
        assert!(is_authorization_rejection(&json_response(
            403,
            json!({ "detail": "Not authenticated" })
        )));
        assert!(is_authorization_rejection(&json_response(
            400,
            json!({ "success": false, "message": "Authorization header missing" })
        )));
        assert!(is_authorization_rejection(&json_response(
            400,
            json!({ "detail": "Invalid token" })
        )));
        assert!(!is_authorization_rejection(&json_response(
            400,
            json!({ "success": false, "message": "malformed JSON body" })
        )));
        assert!(!is_authorization_rejection(&json_response(500, json!({}))));
    }

    #[tokio::test]
    async fn test_forbidden_header_attempt_falls_back_to_body() {
        let transport = ScriptedTransport::new(|req| {
            if req.headers.contains_key(AUTHORIZATION) {
                Ok(json_response(403, json!({ "detail": "Not authenticated" })))
            } else {
                Ok(refresh_ok("A2", Some("R2")))
            }
        });
        let pair = exchange(&transport, URL, "R1").await.unwrap();
        assert_eq!(pair.access_token, "A2");
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_header_convention_first() {
        let transport = ScriptedTransport::new(|_| Ok(refresh_ok("A2", Some("R2"))));
        let pair = exchange(&transport, URL, "R1").await.unwrap();
        assert_eq!(pair.access_token, "A2");
        assert_eq!(pair.refresh_token.as_deref(), Some("R2"));

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].bearer_token(), Some("R1"));
        assert_eq!(requests[0].body.as_deref(), Some(b"{}".as_slice()));
    }

    #[tokio::test]
    async fn test_falls_back_to_body_once() {
        let transport = ScriptedTransport::new(|req| {
            if req.headers.contains_key(AUTHORIZATION) {
                Ok(json_response(401, json!({ "success": false, "message": "Unauthorized" })))
            } else {
                Ok(refresh_ok("A2", None))
            }
        });
        let pair = exchange(&transport, URL, "R1").await.unwrap();
        assert_eq!(pair.access_token, "A2");

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].bearer_token().is_none());
        let body: serde_json::Value =
            serde_json::from_slice(requests[1].body.as_deref().unwrap()).unwrap();
        assert_eq!(body, json!({ "refresh_token": "R1" }));
    }

    #[tokio::test]
    async fn test_both_conventions_refused_is_rejection() {
        let transport = ScriptedTransport::new(|_| {
            Ok(json_response(401, json!({ "success": false, "message": "Invalid refresh token" })))
        });
        let err = exchange(&transport, URL, "R1").await.unwrap_err();
        assert!(matches!(err, AuthError::RefreshRejected { status: 401, .. }));
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_server_error_does_not_fall_back() {
        let transport = ScriptedTransport::new(|_| Ok(json_response(503, json!({}))));
        let err = exchange(&transport, URL, "R1").await.unwrap_err();
        assert!(matches!(err, AuthError::RefreshTransport(_)));
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_success_false_is_rejection() {
        let transport = ScriptedTransport::new(|_| {
            Ok(json_response(200, json!({ "success": false, "message": "Token revoked" })))
        });
        let err = exchange(&transport, URL, "R1").await.unwrap_err();
        match err {
            AuthError::RefreshRejected { status, message } => {
                assert_eq!(status, 200);
                assert_eq!(message, "Token revoked");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_transport_failure() {
        let transport =
            ScriptedTransport::new(|_| Err(TransportError("connection refused".to_string())));
        let err = exchange(&transport, URL, "R1").await.unwrap_err();
        assert!(matches!(err, AuthError::RefreshTransport(ref m) if m.contains("connection refused")));
    }
}
