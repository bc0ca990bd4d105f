//! `LLMLevel`: the most expensive cascade stage, backed by an
//! [`LlmCaller`] (spec §4.2).

use async_trait::async_trait;
use std::sync::Arc;

use cie_core::{CascadeResult, FailureKind, Level, LevelId, LevelKind, LevelOutcome};
use cie_llm::{GenerateParams, LlmCaller, LlmError, LlmMessage, LlmProvider, LlmResponse};

/// Builds the prompt sent to the model from the cascade's input and
/// context. Any `Fn(&I, &C) -> Vec<LlmMessage>` implements this
/// automatically.
pub trait PromptBuilder<I: ?Sized, C: ?Sized>: Send + Sync {
    fn build(&self, input: &I, context: &C) -> Vec<LlmMessage>;
}

impl<I, C, F> PromptBuilder<I, C> for F
where
    I: ?Sized,
    C: ?Sized,
    F: Fn(&I, &C) -> Vec<LlmMessage> + Send + Sync,
{
    fn build(&self, input: &I, context: &C) -> Vec<LlmMessage> {
        self(input, context)
    }
}

/// Parses a model response into `(payload, confidence)`. Returning `Err`
/// becomes `LevelOutcome::Failure(FailureKind::ParseError, ..)` (spec
/// §4.2). Any `Fn(&LlmResponse) -> Result<(P, f64), String>` implements
/// this automatically.
pub trait ResponseParser<P>: Send + Sync {
    fn parse(&self, response: &LlmResponse) -> Result<(P, f64), String>;
}

impl<P, F> ResponseParser<P> for F
where
    F: Fn(&LlmResponse) -> Result<(P, f64), String> + Send + Sync,
{
    fn parse(&self, response: &LlmResponse) -> Result<(P, f64), String> {
        self(response)
    }
}

/// A `Level` that calls `llm_caller.generate(prompt_builder(input,
/// context))`, then `parser(response)` to produce `(payload, confidence)`.
pub struct LLMLevel<Prov, B, R> {
    id: LevelId,
    caller: Arc<LlmCaller<Prov>>,
    prompt_builder: B,
    parser: R,
    params: GenerateParams,
    timeout_ms: Option<u64>,
}

impl<Prov, B, R> LLMLevel<Prov, B, R>
where
    Prov: LlmProvider,
{
    pub fn new(
        id: impl Into<LevelId>,
        caller: Arc<LlmCaller<Prov>>,
        params: GenerateParams,
        prompt_builder: B,
        parser: R,
    ) -> Self {
        Self {
            id: id.into(),
            caller,
            prompt_builder,
            parser,
            params,
            timeout_ms: None,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

#[async_trait]
impl<I, C, P, Prov, B, R> Level<I, C, P> for LLMLevel<Prov, B, R>
where
    I: ?Sized + Sync,
    C: ?Sized + Sync,
    P: Send,
    Prov: LlmProvider + 'static,
    B: PromptBuilder<I, C>,
    R: ResponseParser<P>,
{
    fn id(&self) -> &LevelId {
        &self.id
    }

    fn kind(&self) -> LevelKind {
        LevelKind::Llm
    }

    fn timeout_ms(&self) -> Option<u64> {
        self.timeout_ms
    }

    async fn infer(&self, input: &I, context: &C) -> LevelOutcome<P> {
        let messages = self.prompt_builder.build(input, context);
        match self.caller.generate(&messages, &self.params).await {
            Ok(response) => match self.parser.parse(&response) {
                Ok((payload, confidence)) => {
                    let mut result =
                        CascadeResult::new(payload, confidence, self.id.clone(), LevelKind::Llm);
                    // Surface the caller's own bookkeeping (attempts,
                    // cache_hit) onto the cascade result (spec §9 Design
                    // Notes: "visible to levels ... via metadata.attempts
                    // on success").
                    for (key, value) in response.metadata.iter() {
                        result.metadata_mut().insert(key.clone(), value.clone());
                    }
                    LevelOutcome::Produced(result)
                }
                Err(message) => LevelOutcome::failure(FailureKind::ParseError, message),
            },
            Err(err) => map_llm_error(err),
        }
    }
}

/// Network/timeout/quota errors from the `LlmCaller` never escape as a
/// fatal `Err` out of `Level::infer` — they become recoverable
/// `LevelOutcome::Failure`s the cascade can proceed past (spec §4.2,
/// §7).
fn map_llm_error<P>(err: LlmError) -> LevelOutcome<P> {
    match err {
        LlmError::Timeout => LevelOutcome::failure(FailureKind::Timeout, "llm request timed out"),
        LlmError::Network(message) => LevelOutcome::failure(FailureKind::UpstreamUnavailable, message),
        LlmError::RateLimited { .. } => {
            LevelOutcome::failure(FailureKind::QuotaExhausted, "rate limited")
        }
        LlmError::ServerError(message) => {
            LevelOutcome::failure(FailureKind::UpstreamUnavailable, message)
        }
        LlmError::BadRequest(message) => LevelOutcome::failure(FailureKind::Internal, message),
        LlmError::ConfigError(message) => LevelOutcome::failure(FailureKind::Internal, message),
        LlmError::Cancelled => LevelOutcome::failure(FailureKind::Internal, "cancelled"),
    }
}
