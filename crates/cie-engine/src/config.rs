//! Engine construction configuration (spec §6 "Configuration surface").

use crate::policy::FallbackPolicy;

/// Closed-set configuration for a [`crate::engine::CascadeEngine`].
///
/// Plain builder struct with a `Default` impl and consuming `with_*`
/// methods, matching `rand-loop`'s `PipelineConfig`/`ClientConfig`
/// convention rather than a file-backed config (CIE never reads
/// configuration from disk; see SPEC_FULL.md §2).
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub confidence_threshold: f64,
    pub fallback_policy: FallbackPolicy,
    pub cache_enabled: bool,
    pub cache_capacity: usize,
    pub cache_ttl_ms: u64,
    pub overall_timeout_ms: Option<u64>,
    /// Partitions the cache/coalescer between engines sharing
    /// infrastructure (spec §6 `fingerprint_scope_key`).
    pub fingerprint_scope_key: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            fallback_policy: FallbackPolicy::BestEffort,
            cache_enabled: true,
            cache_capacity: 512,
            cache_ttl_ms: 300_000,
            overall_timeout_ms: None,
            fingerprint_scope_key: String::new(),
        }
    }
}

impl EngineConfig {
    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_fallback_policy(mut self, policy: FallbackPolicy) -> Self {
        self.fallback_policy = policy;
        self
    }

    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn with_cache_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.cache_ttl_ms = ttl_ms;
        self
    }

    pub fn with_overall_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.overall_timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_fingerprint_scope_key(mut self, key: impl Into<String>) -> Self {
        self.fingerprint_scope_key = key.into();
        self
    }
}
