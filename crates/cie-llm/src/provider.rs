//! The `LlmProvider` trait: a single model backend, with no retry, cache,
//! or coalescing of its own — `LlmCaller` supplies all of that uniformly
//! over any provider.
//!
//! Fixes a drift present in the teacher's own `agenticlaw-llm` crate: its
//! `LlmProvider::complete_stream` trait method takes `cancel:
//! Option<CancellationToken>` but `AnthropicProvider`'s impl omits the
//! parameter entirely. Both methods here take a plain `CancellationToken`
//! (never `Option`) consistently.

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

use crate::error::LlmError;
use crate::types::{GenerateParams, LlmMessage, LlmResponse, StreamChunk};

pub type LlmStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, LlmError>> + Send>>;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(
        &self,
        messages: &[LlmMessage],
        params: &GenerateParams,
        cancel: CancellationToken,
    ) -> Result<LlmResponse, LlmError>;

    async fn generate_stream(
        &self,
        messages: &[LlmMessage],
        params: &GenerateParams,
        cancel: CancellationToken,
    ) -> Result<LlmStream, LlmError>;
}

/// Races `fut` against `cancel`, mapping a cancellation to
/// [`LlmError::Cancelled`]. Every provider's `generate`/`generate_stream`
/// should wrap its transport call with this.
pub(crate) async fn with_cancellation<T>(
    cancel: &CancellationToken,
    fut: impl std::future::Future<Output = Result<T, LlmError>>,
) -> Result<T, LlmError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(LlmError::Cancelled),
        result = fut => result,
    }
}

pub(crate) fn cancellable_stream(
    stream: LlmStream,
    cancel: CancellationToken,
) -> LlmStream {
    Box::pin(async_stream::stream! {
        tokio::pin!(stream);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    yield Err(LlmError::Cancelled);
                    break;
                }
                next = stream.next() => {
                    match next {
                        Some(item) => yield item,
                        None => break,
                    }
                }
            }
        }
    })
}
