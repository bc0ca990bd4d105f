//! Deterministic mock providers, mirroring the pack's `StubLlm` and
//! `SwitchableStub` test doubles (`response_cache.rs`).

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::LlmError;
use crate::provider::{LlmProvider, LlmStream};
use crate::types::{GenerateParams, LlmMessage, LlmResponse, StreamChunk};

/// Always returns the same response; counts invocations.
pub struct StubLlm {
    response: LlmResponse,
    calls: Arc<AtomicU32>,
    delay: Duration,
}

impl StubLlm {
    pub fn new(response: LlmResponse) -> Self {
        Self {
            response,
            calls: Arc::new(AtomicU32::new(0)),
            delay: Duration::ZERO,
        }
    }

    /// Makes `generate` sleep before returning, for tests that need to
    /// observe an in-flight request (e.g. coalescing, cancellation).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> Arc<AtomicU32> {
        self.calls.clone()
    }
}

#[async_trait]
impl LlmProvider for StubLlm {
    fn name(&self) -> &str {
        "stub"
    }

    async fn generate(
        &self,
        _messages: &[LlmMessage],
        _params: &GenerateParams,
        _cancel: CancellationToken,
    ) -> Result<LlmResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.response.clone())
    }

    async fn generate_stream(
        &self,
        _messages: &[LlmMessage],
        _params: &GenerateParams,
        _cancel: CancellationToken,
    ) -> Result<LlmStream, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let content = self.response.content.clone();
        let stream = futures::stream::iter(vec![
            Ok(StreamChunk::Text(content)),
            Ok(StreamChunk::Done { usage: None }),
        ]);
        Ok(Box::pin(stream))
    }
}

enum Script {
    FailThenSucceed { remaining_failures: u32, response: LlmResponse },
    AlwaysFail,
    BadRequest,
}

/// A provider whose behavior is scripted up front: fails a fixed number of
/// times (retryable `ServerError`) before succeeding, always fails, or
/// fails with a non-retryable `BadRequest` — covering spec §8 scenario S5
/// (retry idempotence).
pub struct FlakyProvider {
    script: std::sync::Mutex<Script>,
    attempts: Arc<AtomicU32>,
}

impl FlakyProvider {
    pub fn fail_then_succeed(failures: u32, response: LlmResponse) -> Self {
        Self {
            script: std::sync::Mutex::new(Script::FailThenSucceed {
                remaining_failures: failures,
                response,
            }),
            attempts: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn always_fail() -> Self {
        Self {
            script: std::sync::Mutex::new(Script::AlwaysFail),
            attempts: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn bad_request() -> Self {
        Self {
            script: std::sync::Mutex::new(Script::BadRequest),
            attempts: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn attempt_count(&self) -> Arc<AtomicU32> {
        self.attempts.clone()
    }
}

#[async_trait]
impl LlmProvider for FlakyProvider {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn generate(
        &self,
        _messages: &[LlmMessage],
        _params: &GenerateParams,
        _cancel: CancellationToken,
    ) -> Result<LlmResponse, LlmError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().expect("mock mutex poisoned");
        match &mut *script {
            Script::FailThenSucceed { remaining_failures, response } => {
                if *remaining_failures > 0 {
                    *remaining_failures -= 1;
                    Err(LlmError::ServerError("transient".to_string()))
                } else {
                    Ok(response.clone())
                }
            }
            Script::AlwaysFail => Err(LlmError::ServerError("down".to_string())),
            Script::BadRequest => Err(LlmError::BadRequest("malformed".to_string())),
        }
    }

    async fn generate_stream(
        &self,
        _messages: &[LlmMessage],
        _params: &GenerateParams,
        _cancel: CancellationToken,
    ) -> Result<LlmStream, LlmError> {
        Err(LlmError::ServerError("streaming not scripted".to_string()))
    }
}
