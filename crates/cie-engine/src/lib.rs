//! The Cascade Engine: orchestrates an ordered list of `cie_core::Level`s
//! with short-circuiting, fallback, caching, and coalescing (spec §4.1).
//!
//! Ships two mandatory built-in level adapters over the bare `Level`
//! contract (spec §4.2): [`RuleLevel`] wraps a pure function, [`LLMLevel`]
//! wraps a [`cie_llm::LlmCaller`]. Neither is a domain implementation —
//! both are generic over the payload type the caller's closures produce.

pub mod config;
pub mod engine;
pub mod llm_level;
pub mod policy;
pub mod rule_level;

pub use config::EngineConfig;
pub use engine::CascadeEngine;
pub use llm_level::{LLMLevel, PromptBuilder, ResponseParser};
pub use policy::FallbackPolicy;
pub use rule_level::RuleLevel;
