//! The `Level` contract (spec §4.2): a single inference stage.

use crate::result::{CascadeResult, LevelKind};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Stable identifier for a level, cheaply cloneable and used in metrics and
/// result provenance. Mirrors the teacher's `SessionKey` pattern
/// (`agenticlaw-core::types::SessionKey`).
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct LevelId(Arc<str>);

impl LevelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(Arc::from(id.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LevelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for LevelId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for LevelId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Why a level failed to produce a result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    UpstreamUnavailable,
    InvalidInput,
    Timeout,
    ParseError,
    QuotaExhausted,
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::UpstreamUnavailable => "upstream_unavailable",
            FailureKind::InvalidInput => "invalid_input",
            FailureKind::Timeout => "timeout",
            FailureKind::ParseError => "parse_error",
            FailureKind::QuotaExhausted => "quota_exhausted",
            FailureKind::Internal => "internal",
        }
    }

    /// Whether the cascade may proceed to the next level after this failure.
    /// `invalid_input` is the sole non-recoverable kind (spec §4.2).
    pub fn default_recoverable(&self) -> bool {
        !matches!(self, FailureKind::InvalidInput)
    }
}

/// A level's report for a single `infer` attempt.
#[derive(Clone, Debug)]
pub enum LevelOutcome<P> {
    /// The level produced a result (confidence may be below threshold).
    Produced(CascadeResult<P>),
    /// The level's own `skip_predicate` declined to run; invisible to
    /// fallback (spec §9 Open Questions — decided: skipped levels never
    /// count as failed).
    Skipped,
    /// The level failed to produce a result.
    Failure {
        kind: FailureKind,
        recoverable: bool,
        message: String,
    },
}

impl<P> LevelOutcome<P> {
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failure {
            recoverable: kind.default_recoverable(),
            kind,
            message: message.into(),
        }
    }
}

/// A single stage in the cascade.
///
/// `I` is the (borrowed) input type, `C` the ambient context, `P` the
/// payload type produced on success. Implementors must be safe to invoke
/// concurrently from multiple threads (spec §5): internally synchronize any
/// non-threadsafe resource a level wraps.
#[async_trait]
pub trait Level<I: ?Sized, C: ?Sized, P>: Send + Sync {
    fn id(&self) -> &LevelId;

    fn kind(&self) -> LevelKind;

    /// Per-attempt timeout. Rule levels must be bounded-time and should
    /// leave this `None`.
    fn timeout_ms(&self) -> Option<u64> {
        None
    }

    /// Pure predicate deciding whether this level should be skipped for a
    /// given input/context, checked by the engine before `infer` is called.
    fn skip_predicate(&self, _input: &I, _context: &C) -> bool {
        false
    }

    async fn infer(&self, input: &I, context: &C) -> LevelOutcome<P>;
}
