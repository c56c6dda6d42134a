//! Blocking HTTP client for the provider's REST API.
//!
//! Requests carry the credential in the `x-goog-api-key` header. The key is
//! looked up on every call so a change of environment or settings takes effect
//! without restarting.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Result, StudioError};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Environment variables consulted for the credential, in order.
pub const API_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Longest error body echoed back in an error message.
const ERROR_SNIPPET_LEN: usize = 300;

/// Resolve the credential: environment first, then `fallback` (the settings
/// file value).
///
/// # Errors
/// `StudioError::MissingCredential` when neither source has a non-empty key.
pub fn resolve_api_key(fallback: Option<&str>) -> Result<String> {
    API_KEY_VARS
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .chain(fallback.map(str::to_string))
        .map(|key| key.trim().to_string())
        .find(|key| !key.is_empty())
        .ok_or(StudioError::MissingCredential)
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    /// Used when no environment variable is set.
    pub api_key: Option<String>,
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            request_timeout: Duration::from_secs(120),
        }
    }
}

pub struct GeminiClient {
    http: reqwest::blocking::Client,
    config: ClientConfig,
}

impl GeminiClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { http, config })
    }

    pub fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn api_key(&self) -> Result<String> {
        resolve_api_key(self.config.api_key.as_deref())
    }

    /// `POST {base}/v1beta/models/{model}:{method}` with a JSON body.
    pub fn post_model<B: Serialize + ?Sized>(&self, model: &str, method: &str, body: &B) -> Result<String> {
        let url = format!("{}/v1beta/models/{model}:{method}", self.base_url());
        debug!(model, method, "provider request");
        let response = self
            .http
            .post(&url)
            .header(API_KEY_HEADER, self.api_key()?)
            .json(body)
            .send()?;
        read_body(response)
    }

    /// `GET {base}/v1beta/{path}`.
    pub fn get(&self, path: &str) -> Result<String> {
        let url = format!("{}/v1beta/{}", self.base_url(), path.trim_start_matches('/'));
        let response = self
            .http
            .get(&url)
            .header(API_KEY_HEADER, self.api_key()?)
            .send()?;
        read_body(response)
    }

    /// Download a provider-hosted file. Returns the bytes and content type.
    pub fn download(&self, uri: &str) -> Result<(Vec<u8>, Option<String>)> {
        let response = self
            .http
            .get(uri)
            .header(API_KEY_HEADER, self.api_key()?)
            .send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(http_error(status, &body));
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes()?;
        Ok((bytes.to_vec(), content_type))
    }
}

fn read_body(response: reqwest::blocking::Response) -> Result<String> {
    let status = response.status();
    let body = response.text()?;
    if !status.is_success() {
        return Err(http_error(status, &body));
    }
    Ok(body)
}

fn http_error(status: reqwest::StatusCode, body: &str) -> StudioError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.pointer("/error/message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.chars().take(ERROR_SNIPPET_LEN).collect());
    warn!(status = status.as_u16(), "provider request failed");
    StudioError::RequestFailed(format!("HTTP {}: {}", status.as_u16(), message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_error_prefers_provider_message() {
        let err = http_error(
            reqwest::StatusCode::BAD_REQUEST,
            r#"{"error": {"code": 400, "message": "API key not valid"}}"#,
        );
        assert_eq!(err.to_string(), "provider request failed: HTTP 400: API key not valid");
    }

    #[test]
    fn http_error_truncates_plain_bodies() {
        let body = "x".repeat(1000);
        let StudioError::RequestFailed(message) =
            http_error(reqwest::StatusCode::BAD_GATEWAY, &body)
        else {
            panic!("expected RequestFailed");
        };
        assert!(message.len() < 400);
    }

    #[test]
    fn base_url_trailing_slash_is_ignored() {
        let client = GeminiClient::new(ClientConfig {
            base_url: "http://localhost:8080/".into(),
            ..ClientConfig::default()
        })
        .unwrap();
        assert_eq!(client.base_url(), "http://localhost:8080");
    }
}
