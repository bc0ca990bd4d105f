//! Request/response vocabulary for the LLM Caller contract (spec §4.3).
//!
//! Adapted from the teacher's `agenticlaw-llm::types`: a single `messages`
//! vector keyed by role, plus a generation-parameters bag instead of a
//! fixed request struct, so the caller contract stays provider-agnostic.

use serde::Serialize;
use std::collections::HashMap;

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct LlmMessage {
    pub role: String,
    pub content: String,
}

impl LlmMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Generation parameters (spec §4.3 `generate` inputs).
#[derive(Clone, Debug, Serialize)]
pub struct GenerateParams {
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra_passthrough: serde_json::Map<String, serde_json::Value>,
}

impl GenerateParams {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: None,
            max_tokens: 4096,
            extra_passthrough: serde_json::Map::new(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A completed generation (spec §4.3 `generate` result).
#[derive(Clone, Debug, PartialEq)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub usage: Usage,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl LlmResponse {
    pub fn new(content: impl Into<String>, model: impl Into<String>, usage: Usage) -> Self {
        Self {
            content: content.into(),
            model: model.into(),
            usage,
            metadata: HashMap::new(),
        }
    }

    pub fn mark_cache_hit(mut self) -> Self {
        self.metadata
            .insert("cache_hit".to_string(), serde_json::Value::Bool(true));
        self
    }
}

/// A single chunk of a streamed generation; chunks concatenate to the
/// final `content` of an equivalent non-streaming `LlmResponse`.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamChunk {
    Text(String),
    Done { usage: Option<Usage> },
}
