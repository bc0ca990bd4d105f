//! LLM Caller contract: retrying, caching, coalescing invocation of a
//! chat-style text model, plus one concrete HTTP-backed provider.

pub mod anthropic;
pub mod caller;
pub mod error;
pub mod provider;
pub mod transport;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use anthropic::AnthropicProvider;
pub use caller::{LlmCaller, LlmCallerConfig};
pub use error::LlmError;
pub use provider::{LlmProvider, LlmStream};
pub use transport::{HttpTransport, ReqwestTransport};
pub use types::{GenerateParams, LlmMessage, LlmResponse, StreamChunk, Usage};
