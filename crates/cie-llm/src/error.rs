//! LLM-specific error taxonomy (spec §4.3), mirroring the teacher's
//! `agenticlaw-llm::provider::LlmError` but aligned to the caller contract
//! rather than a single provider.

#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("missing or invalid credentials: {0}")]
    ConfigError(String),

    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited: retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("server error: {0}")]
    ServerError(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("cancelled")]
    Cancelled,
}

impl LlmError {
    /// Whether the retry policy in `LlmCaller` should retry this error
    /// (spec §4.3: retry `Timeout`/`Network`/`RateLimited`/`ServerError`;
    /// never `BadRequest`/`ConfigError`/`Cancelled`).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::Timeout | LlmError::Network(_) | LlmError::RateLimited { .. } | LlmError::ServerError(_)
        )
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}
