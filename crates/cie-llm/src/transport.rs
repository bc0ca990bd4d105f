//! HTTP transport seam (spec §6 "HTTP-style transport ... configurable
//! timeouts per call").
//!
//! The teacher's `AnthropicProvider` hardcodes `reqwest::Client` inline;
//! here it sits behind a trait so tests can swap in a deterministic mock
//! instead of hitting the network, the way `rlm-core::client` isolates
//! `build_http_client`.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;

use crate::error::LlmError;

pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
}

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, LlmError>> + Send>>;

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn post_json(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<HttpResponse, LlmError>;

    async fn post_json_stream(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<ByteStream, LlmError>;
}

/// The one HTTP-backed transport CIE ships: `reqwest::Client` with
/// rustls, matching the teacher's default client construction.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post_json(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<HttpResponse, LlmError> {
        let mut request = self.client.post(url).json(body).timeout(timeout);
        for (key, value) in headers {
            request = request.header(key, value);
        }
        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        Ok(HttpResponse { status, body })
    }

    async fn post_json_stream(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<ByteStream, LlmError> {
        let mut request = self.client.post(url).json(body).timeout(timeout);
        for (key, value) in headers {
            request = request.header(key, value);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), text));
        }
        let stream = response.bytes_stream().map_err(LlmError::from);
        Ok(Box::pin(stream))
    }
}

pub(crate) fn classify_status(status: u16, body: String) -> LlmError {
    match status {
        401 | 403 => LlmError::ConfigError(body),
        429 => LlmError::RateLimited {
            retry_after_ms: None,
        },
        400 => LlmError::BadRequest(body),
        s if s >= 500 => LlmError::ServerError(body),
        _ => LlmError::ServerError(body),
    }
}
