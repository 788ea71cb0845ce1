//! Authenticated HTTP client for the dashboard API
//!
//! Resolves paths against the base URL and sends everything through the
//! session manager, so callers never handle tokens.

use anyhow::{bail, Context, Result};
use reqwest::Method;
use serde::de::DeserializeOwned;

use super::transport::{HttpRequest, HttpResponse};
use crate::auth::{AuthError, SessionTokenManager};

/// Dashboard API client bound to one session.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: url::Url,
    session: SessionTokenManager,
}

impl ApiClient {
    pub fn new(base_url: url::Url, session: SessionTokenManager) -> Self {
        Self { base_url, session }
    }

    /// Absolute URLs pass through; anything else is joined to the base URL.
    pub fn url(&self, path: &str) -> Result<String> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return Ok(path.to_string());
        }
        let base = self.base_url.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        let joined = format!("{}/{}", base, path);
        url::Url::parse(&joined).with_context(|| format!("Invalid request URL '{}'", joined))?;
        Ok(joined)
    }

    pub fn request(&self, method: Method, path: &str) -> Result<HttpRequest> {
        Ok(HttpRequest::new(method, self.url(path)?))
    }

    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse, AuthError> {
        self.session.authenticated_fetch(request).await
    }

    pub async fn get(&self, path: &str) -> Result<HttpResponse> {
        let request = self.request(Method::GET, path)?;
        tracing::debug!("GET {}", request.url);
        Ok(self.send(request).await?)
    }

    pub async fn post_json(&self, path: &str, body: &serde_json::Value) -> Result<HttpResponse> {
        let request = self.request(Method::POST, path)?.json(body);
        tracing::debug!("POST {}", request.url);
        Ok(self.send(request).await?)
    }

    pub async fn delete(&self, path: &str) -> Result<HttpResponse> {
        let request = self.request(Method::DELETE, path)?;
        tracing::debug!("DELETE {}", request.url);
        Ok(self.send(request).await?)
    }

    /// GET `path` and decode a successful JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path)?;
        let resp = check_response(self.get(path).await?, &url)?;
        resp.json()
            .with_context(|| format!("Failed to parse response from {}", url))
    }
}

/// Check HTTP response status code and return a clear error on failure.
pub fn check_response(resp: HttpResponse, url: &str) -> Result<HttpResponse> {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        bail!(
            "401 Unauthorized for {}. Session may be invalid -- run 'approval-session login'.",
            url
        );
    }
    if !status.is_success() {
        bail!("HTTP {} for {}: {}", status.as_u16(), url, resp.text());
    }
    Ok(resp)
}
