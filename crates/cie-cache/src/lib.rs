//! Engine-scoped cache and in-flight request coalescing.
//!
//! Both are keyed by `cie_core::Fingerprint` and used by `cie-engine` (for
//! whole-cascade results) and `cie-llm` (for individual LLM calls).

pub mod cache;
pub mod coalescer;

pub use cache::{Cache, CacheConfig};
pub use coalescer::InflightCoalescer;
