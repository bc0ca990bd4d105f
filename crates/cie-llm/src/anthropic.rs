//! Anthropic Claude provider, ported from the teacher's
//! `agenticlaw-llm::anthropic` onto the `HttpTransport` seam and the
//! caller-contract's plain-text `LlmMessage`/`LlmResponse` types.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::LlmError;
use crate::provider::{cancellable_stream, with_cancellation, LlmProvider, LlmStream};
use crate::transport::{classify_status, HttpTransport, ReqwestTransport};
use crate::types::{GenerateParams, LlmMessage, LlmResponse, StreamChunk, Usage};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    transport: Arc<dyn HttpTransport>,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            transport: Arc::new(ReqwestTransport::new()),
            api_key: api_key.into(),
            base_url: ANTHROPIC_API_URL.to_string(),
        }
    }

    /// Build from the `ANTHROPIC_API_KEY` environment variable, per spec
    /// §6's "env-variable fallback for credentials".
    pub fn from_env() -> Result<Self, LlmError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| LlmError::ConfigError("ANTHROPIC_API_KEY not set".to_string()))?;
        Ok(Self::new(api_key))
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = transport;
        self
    }

    fn headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert("x-api-key".to_string(), self.api_key.clone());
        headers.insert("anthropic-version".to_string(), ANTHROPIC_VERSION.to_string());
        headers.insert("content-type".to_string(), "application/json".to_string());
        headers
    }

    fn body(&self, messages: &[LlmMessage], params: &GenerateParams, stream: bool) -> serde_json::Value {
        let (system, turns): (Option<String>, Vec<&LlmMessage>) = {
            let mut system = None;
            let mut turns = Vec::new();
            for message in messages {
                if message.role == "system" && system.is_none() {
                    system = Some(message.content.clone());
                } else {
                    turns.push(message);
                }
            }
            (system, turns)
        };

        let request = AnthropicRequest {
            model: params.model.clone(),
            messages: turns
                .iter()
                .map(|m| AnthropicMessage {
                    role: m.role.clone(),
                    content: m.content.clone(),
                })
                .collect(),
            max_tokens: params.max_tokens,
            stream,
            system,
            temperature: params.temperature,
        };
        let mut value = serde_json::to_value(request).unwrap_or(serde_json::Value::Null);

        // Merge caller-supplied passthrough fields (spec §3 "plus provider
        // passthrough options"), non-destructively: they can add fields
        // the fixed request shape above doesn't cover but can never
        // override one of them.
        if let serde_json::Value::Object(ref mut map) = value {
            for (key, extra_value) in &params.extra_passthrough {
                map.entry(key.clone()).or_insert_with(|| extra_value.clone());
            }
        }

        value
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn generate(
        &self,
        messages: &[LlmMessage],
        params: &GenerateParams,
        cancel: CancellationToken,
    ) -> Result<LlmResponse, LlmError> {
        let body = self.body(messages, params, false);
        debug!(model = %params.model, "anthropic generate");

        let response = with_cancellation(
            &cancel,
            self.transport
                .post_json(&self.base_url, &self.headers(), &body, Duration::from_secs(120)),
        )
        .await?;

        if response.status < 200 || response.status >= 300 {
            let text = String::from_utf8_lossy(&response.body).to_string();
            return Err(classify_status(response.status, text));
        }

        let parsed: AnthropicResponse = serde_json::from_slice(&response.body)
            .map_err(|e| LlmError::ServerError(format!("malformed response: {e}")))?;

        let content = parsed
            .content
            .into_iter()
            .filter_map(|block| match block {
                AnthropicContentBlock::Text { text } => Some(text),
            })
            .collect::<Vec<_>>()
            .join("");

        Ok(LlmResponse::new(
            content,
            parsed.model,
            Usage {
                prompt_tokens: parsed.usage.input_tokens,
                completion_tokens: parsed.usage.output_tokens,
                total_tokens: parsed.usage.input_tokens + parsed.usage.output_tokens,
            },
        ))
    }

    async fn generate_stream(
        &self,
        messages: &[LlmMessage],
        params: &GenerateParams,
        cancel: CancellationToken,
    ) -> Result<LlmStream, LlmError> {
        let body = self.body(messages, params, true);
        debug!(model = %params.model, "anthropic generate_stream");

        let byte_stream = with_cancellation(
            &cancel,
            self.transport
                .post_json_stream(&self.base_url, &self.headers(), &body, Duration::from_secs(120)),
        )
        .await?;

        let stream: LlmStream = Box::pin(parse_sse_stream(byte_stream));
        Ok(cancellable_stream(stream, cancel))
    }
}

fn parse_sse_stream(
    byte_stream: impl futures::Stream<Item = Result<bytes::Bytes, LlmError>> + Send + 'static,
) -> impl futures::Stream<Item = Result<StreamChunk, LlmError>> + Send {
    async_stream::stream! {
        let mut buffer = String::new();
        tokio::pin!(byte_stream);

        while let Some(chunk_result) = byte_stream.next().await {
            let chunk = match chunk_result {
                Ok(c) => c,
                Err(e) => {
                    yield Err(e);
                    continue;
                }
            };
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(event_end) = buffer.find("\n\n") {
                let event_str = buffer[..event_end].to_string();
                buffer = buffer[event_end + 2..].to_string();

                let mut event_type = String::new();
                let mut event_data = String::new();
                for line in event_str.lines() {
                    if let Some(rest) = line.strip_prefix("event: ") {
                        event_type = rest.to_string();
                    } else if let Some(rest) = line.strip_prefix("data: ") {
                        event_data = rest.to_string();
                    }
                }
                if event_data.is_empty() {
                    continue;
                }

                match event_type.as_str() {
                    "content_block_delta" => {
                        if let Ok(data) = serde_json::from_str::<ContentBlockDelta>(&event_data) {
                            if data.delta.delta_type == "text_delta" {
                                if let Some(text) = data.delta.text {
                                    yield Ok(StreamChunk::Text(text));
                                }
                            }
                        }
                    }
                    "message_delta" => {
                        if let Ok(data) = serde_json::from_str::<MessageDelta>(&event_data) {
                            if let Some(usage) = data.usage {
                                yield Ok(StreamChunk::Done {
                                    usage: Some(Usage {
                                        prompt_tokens: usage.input_tokens,
                                        completion_tokens: usage.output_tokens,
                                        total_tokens: usage.input_tokens + usage.output_tokens,
                                    }),
                                });
                            }
                        }
                    }
                    "message_stop" => {
                        yield Ok(StreamChunk::Done { usage: None });
                    }
                    "error" => {
                        if let Ok(data) = serde_json::from_str::<ErrorEvent>(&event_data) {
                            yield Err(LlmError::ServerError(data.error.message));
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    model: String,
    content: Vec<AnthropicContentBlock>,
    usage: AnthropicUsage,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum AnthropicContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Deserialize)]
struct ContentBlockDelta {
    delta: TextDelta,
}

#[derive(Deserialize)]
struct TextDelta {
    #[serde(rename = "type")]
    delta_type: String,
    text: Option<String>,
}

#[derive(Deserialize)]
struct MessageDelta {
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
struct ErrorEvent {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}
