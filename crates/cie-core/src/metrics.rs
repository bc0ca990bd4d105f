//! Fixed metric names, shared by `cie-engine` and `cie-llm` so test
//! harnesses can assert on them (spec §6: "names fixed for test
//! assertions"). CIE has no metrics backend of its own — these constants
//! are the `tracing` event/field names callers filter on.

pub const INFER_CALLS: &str = "cie.infer.calls";
pub const INFER_CACHE_HITS: &str = "cie.infer.cache_hits";
pub const INFER_COALESCED_JOINS: &str = "cie.infer.coalesced_joins";
pub const INFER_THRESHOLD_SHORTCUT: &str = "cie.infer.threshold_shortcut";
pub const LEVEL_LATENCY_MS: &str = "cie.level.latency_ms";
pub const LEVEL_FAILURES: &str = "cie.level.failures";
pub const LLM_REQUEST_LATENCY_MS: &str = "llm.request.latency_ms";
pub const LLM_REQUEST_RETRIES: &str = "llm.request.retries";
pub const LLM_REQUEST_CACHE_HITS: &str = "llm.request.cache_hits";
