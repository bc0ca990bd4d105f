//! `LlmCaller`: retry, caching, and coalescing wrapped around any
//! `LlmProvider` (spec §4.3).

use std::sync::Arc;
use std::time::{Duration, Instant};

use cie_cache::{Cache, CacheConfig, InflightCoalescer};
use cie_core::{metrics, Fingerprint};
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::LlmError;
use crate::provider::{LlmProvider, LlmStream};
use crate::types::{GenerateParams, LlmMessage, LlmResponse};

const FINGERPRINT_SCOPE: &str = "cie-llm";

#[derive(Clone, Debug)]
pub struct LlmCallerConfig {
    pub model: String,
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub request_timeout_ms: u64,
    pub cache_enabled: bool,
    pub cache_capacity: usize,
    pub cache_ttl_ms: u64,
}

impl Default for LlmCallerConfig {
    fn default() -> Self {
        Self {
            model: "claude-opus-4-6-20250929".to_string(),
            max_retries: 3,
            base_backoff_ms: 200,
            request_timeout_ms: 60_000,
            cache_enabled: true,
            cache_capacity: 1024,
            cache_ttl_ms: 600_000,
        }
    }
}

impl LlmCallerConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }
}

/// A retrying, caching, coalescing wrapper over a single [`LlmProvider`].
///
/// Owns its own `Cache`/`InflightCoalescer`, independent of any
/// `CascadeEngine` instance the caller happens to also feed (spec §3
/// "The LLM Caller is shared; it owns its own cache and coalescer
/// independent of the Engine's.").
pub struct LlmCaller<Prov: LlmProvider> {
    provider: Arc<Prov>,
    config: LlmCallerConfig,
    cache: Arc<Cache<LlmResponse>>,
    coalescer: InflightCoalescer<Result<LlmResponse, LlmError>>,
}

impl<Prov: LlmProvider + 'static> LlmCaller<Prov> {
    pub fn new(provider: Prov, config: LlmCallerConfig) -> Self {
        let cache = Arc::new(Cache::new(CacheConfig {
            capacity: config.cache_capacity,
            ttl: Duration::from_millis(config.cache_ttl_ms),
        }));
        Self {
            provider: Arc::new(provider),
            config,
            cache,
            coalescer: InflightCoalescer::new(),
        }
    }

    /// spec §4.3 `generate`: cached, coalesced, retried invocation.
    pub async fn generate(
        &self,
        messages: &[LlmMessage],
        params: &GenerateParams,
    ) -> Result<LlmResponse, LlmError> {
        self.generate_cancellable(messages, params, CancellationToken::new())
            .await
    }

    /// Like `generate`, but `cancel` lets this caller drop out of its own
    /// wait early. If other callers are still coalesced on the same
    /// fingerprint, the underlying computation (running on its own task;
    /// see `cie_cache::InflightCoalescer`) keeps going for them regardless
    /// of this caller's cancellation (spec §5).
    pub async fn generate_cancellable(
        &self,
        messages: &[LlmMessage],
        params: &GenerateParams,
        cancel: CancellationToken,
    ) -> Result<LlmResponse, LlmError> {
        let key = Fingerprint::of(&(messages, params), FINGERPRINT_SCOPE);

        if self.config.cache_enabled {
            if let Some(cached) = self.cache.get(&key) {
                debug!(metric = metrics::LLM_REQUEST_CACHE_HITS, %key, "llm cache hit");
                return Ok(cached.mark_cache_hit());
            }
        }

        let provider = self.provider.clone();
        let cache = self.cache.clone();
        let cache_enabled = self.config.cache_enabled;
        let config = self.config.clone();
        let owned_messages = messages.to_vec();
        let owned_params = params.clone();

        let join = self.coalescer.join_or_start(key, move |task_cancel| async move {
            let outcome =
                Self::call_with_retry(provider, &owned_messages, &owned_params, &config, task_cancel)
                    .await;

            // The spawned task, not any particular caller, owns this cache
            // write: it runs to completion regardless of who stays around
            // to observe it.
            if let Ok(response) = &outcome {
                if cache_enabled {
                    cache.put(key, response.clone());
                }
            }

            outcome
        });

        let (outcome, _coalesced) = tokio::select! {
            result = join => result,
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
        };

        outcome
    }

    /// spec §4.3 `with_system`: convenience equivalent to
    /// `generate([system, user], params)`.
    pub async fn with_system(
        &self,
        prompt: impl Into<String>,
        system_prompt: impl Into<String>,
        params: &GenerateParams,
    ) -> Result<LlmResponse, LlmError> {
        let messages = vec![LlmMessage::system(system_prompt), LlmMessage::user(prompt)];
        self.generate(&messages, params).await
    }

    /// spec §4.3 `generate_stream`: bypasses the cache entirely.
    pub async fn generate_stream(
        &self,
        messages: &[LlmMessage],
        params: &GenerateParams,
        cancel: CancellationToken,
    ) -> Result<LlmStream, LlmError> {
        self.provider.generate_stream(messages, params, cancel).await
    }

    async fn call_with_retry(
        provider: Arc<Prov>,
        messages: &[LlmMessage],
        params: &GenerateParams,
        config: &LlmCallerConfig,
        cancel: CancellationToken,
    ) -> Result<LlmResponse, LlmError> {
        let started_at = Instant::now();
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(LlmError::Cancelled);
            }

            let timeout = Duration::from_millis(config.request_timeout_ms);
            let attempt_result = tokio::time::timeout(
                timeout,
                provider.generate(messages, params, cancel.clone()),
            )
            .await;

            let result = match attempt_result {
                Ok(r) => r,
                Err(_) => Err(LlmError::Timeout),
            };

            match result {
                Ok(mut response) => {
                    if attempt > 0 {
                        info!(attempt, "llm request succeeded after retry");
                    }
                    debug!(
                        metric = metrics::LLM_REQUEST_LATENCY_MS,
                        latency_ms = started_at.elapsed().as_millis() as u64,
                        "llm request completed"
                    );
                    // Retry count is invisible to callers except through
                    // this metadata field (spec §9 Design Notes).
                    response.metadata.insert(
                        "attempts".to_string(),
                        serde_json::Value::from(attempt + 1),
                    );
                    return Ok(response);
                }
                Err(err) if err.is_retryable() && attempt < config.max_retries => {
                    warn!(metric = metrics::LLM_REQUEST_RETRIES, attempt, error = %err, "retrying llm request");
                    let backoff = Self::backoff_delay(config, attempt);
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// `base·2^attempt + jitter∈[0,base]` (spec §4.3 retry policy).
    fn backoff_delay(config: &LlmCallerConfig, attempt: u32) -> Duration {
        let base = config.base_backoff_ms;
        let exp = base.saturating_mul(1u64 << attempt.min(32));
        let jitter = rand::thread_rng().gen_range(0..=base);
        Duration::from_millis(exp.saturating_add(jitter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FlakyProvider, StubLlm};
    use crate::types::Usage;

    fn params() -> GenerateParams {
        GenerateParams::new("stub-model")
    }

    #[tokio::test]
    async fn caches_successful_responses() {
        let provider = StubLlm::new(LlmResponse::new("hi", "stub-model", Usage::default()));
        let calls = provider.call_count();
        let caller = LlmCaller::new(provider, LlmCallerConfig::default());

        let messages = vec![LlmMessage::user("hello")];
        let first = caller.generate(&messages, &params()).await.unwrap();
        let second = caller.generate(&messages, &params()).await.unwrap();

        assert!(!first.metadata.contains_key("cache_hit"));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(second.content, "hi");
    }

    #[tokio::test]
    async fn disabled_cache_calls_every_time() {
        let provider = StubLlm::new(LlmResponse::new("hi", "stub-model", Usage::default()));
        let calls = provider.call_count();
        let caller = LlmCaller::new(provider, LlmCallerConfig::default().with_cache_enabled(false));

        let messages = vec![LlmMessage::user("hello")];
        caller.generate(&messages, &params()).await.unwrap();
        caller.generate(&messages, &params()).await.unwrap();

        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retries_transient_failures_then_succeeds() {
        let provider = FlakyProvider::fail_then_succeed(2, LlmResponse::new("ok", "stub-model", Usage::default()));
        let attempts = provider.attempt_count();
        let caller = LlmCaller::new(
            provider,
            LlmCallerConfig::default().with_max_retries(3),
        );

        let messages = vec![LlmMessage::user("hello")];
        let response = caller.generate(&messages, &params()).await.unwrap();

        assert_eq!(response.content, "ok");
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn records_attempt_count_in_metadata_on_success() {
        let provider = FlakyProvider::fail_then_succeed(2, LlmResponse::new("ok", "stub-model", Usage::default()));
        let caller = LlmCaller::new(provider, LlmCallerConfig::default().with_max_retries(3));

        let messages = vec![LlmMessage::user("hello")];
        let response = caller.generate(&messages, &params()).await.unwrap();

        assert_eq!(
            response.metadata.get("attempts"),
            Some(&serde_json::Value::from(3))
        );
    }

    #[tokio::test]
    async fn exhausts_retries_and_surfaces_error() {
        let provider = FlakyProvider::always_fail();
        let caller = LlmCaller::new(provider, LlmCallerConfig::default().with_max_retries(2));

        let messages = vec![LlmMessage::user("hello")];
        let result = caller.generate(&messages, &params()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn does_not_retry_bad_request() {
        let provider = FlakyProvider::bad_request();
        let attempts = provider.attempt_count();
        let caller = LlmCaller::new(provider, LlmCallerConfig::default().with_max_retries(5));

        let messages = vec![LlmMessage::user("hello")];
        let result = caller.generate(&messages, &params()).await;
        assert!(result.is_err());
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    /// Reproduces the scenario the maintainer flagged: a caller races its
    /// own `generate_cancellable` against cancellation while a second
    /// caller is still coalesced on the same fingerprint. The second
    /// caller must still get the result.
    #[tokio::test(flavor = "multi_thread")]
    async fn cancelling_one_caller_does_not_hang_a_coalesced_sibling() {
        let provider = StubLlm::new(LlmResponse::new("slow", "stub-model", Usage::default()))
            .with_delay(Duration::from_millis(100));
        let caller = Arc::new(LlmCaller::new(provider, LlmCallerConfig::default()));
        let messages = vec![LlmMessage::user("hello")];

        let cancel = CancellationToken::new();
        let first = {
            let caller = caller.clone();
            let messages = messages.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { caller.generate_cancellable(&messages, &params(), cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = {
            let caller = caller.clone();
            let messages = messages.clone();
            tokio::spawn(async move { caller.generate(&messages, &params()).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let first_result = first.await.unwrap();
        assert!(matches!(first_result, Err(LlmError::Cancelled)));

        let second_result = tokio::time::timeout(Duration::from_secs(2), second)
            .await
            .expect("second caller must not hang when the first is cancelled")
            .unwrap();
        assert_eq!(second_result.unwrap().content, "slow");
    }
}
