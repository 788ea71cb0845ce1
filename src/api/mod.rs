//! HTTP plumbing for the dashboard API

pub mod client;
#[cfg(test)]
pub(crate) mod testing;
pub mod transport;

pub use client::ApiClient;
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportError};

use anyhow::{Context, Result};
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Method;

/// Send one authenticated request and print the response.
pub async fn fetch(
    client: &ApiClient,
    method: &str,
    path: &str,
    headers: &[String],
    body: Option<String>,
) -> Result<()> {
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method '{}'", method))?;
    let mut request = client.request(method, path)?;

    for raw in headers {
        let (name, value) = parse_header(raw)?;
        request = request.header(name, value);
    }
    if let Some(body) = body {
        request = match serde_json::from_str::<serde_json::Value>(&body) {
            Ok(json) => request.json(&json),
            Err(_) => request.body(body),
        };
    }

    let resp = client.send(request).await?;
    println!("HTTP {}", resp.status());
    let text = resp.text();
    match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", text),
    }
    Ok(())
}

/// Parse `Name: value`.
fn parse_header(raw: &str) -> Result<(HeaderName, HeaderValue)> {
    let (name, value) = raw
        .split_once(':')
        .with_context(|| format!("Header '{}' is not of the form 'Name: value'", raw))?;
    let name = HeaderName::from_bytes(name.trim().as_bytes())
        .with_context(|| format!("Invalid header name in '{}'", raw))?;
    let value = HeaderValue::from_str(value.trim())
        .with_context(|| format!("Invalid header value in '{}'", raw))?;
    Ok((name, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header() {
        let (name, value) = parse_header("X-Tab:  videos ").unwrap();
        assert_eq!(name.as_str(), "x-tab");
        assert_eq!(value, "videos");
        assert!(parse_header("no-colon").is_err());
        assert!(parse_header("bad name: v").is_err());
    }
}
