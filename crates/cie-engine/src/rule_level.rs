//! `RuleLevel`: wraps a pure function as the cheapest cascade stage
//! (spec §4.2).

use async_trait::async_trait;
use cie_core::{Level, LevelId, LevelKind, LevelOutcome};

/// A `Level` backed by a caller-supplied pure function. Never times out —
/// rules must be bounded-time by construction (spec §4.2) — so
/// `timeout_ms` always returns `None` regardless of engine configuration.
///
/// Failures are whatever `LevelOutcome::Failure` the closure itself
/// returns; by convention a rule with nothing better to say reports
/// `FailureKind::Internal` (spec §4.2 "failures map to internal").
pub struct RuleLevel<F> {
    id: LevelId,
    f: F,
}

impl<F> RuleLevel<F> {
    pub fn new(id: impl Into<LevelId>, f: F) -> Self {
        Self { id: id.into(), f }
    }
}

#[async_trait]
impl<I, C, P, F> Level<I, C, P> for RuleLevel<F>
where
    I: ?Sized + Sync,
    C: ?Sized + Sync,
    P: Send,
    F: Fn(&I, &C) -> LevelOutcome<P> + Send + Sync,
{
    fn id(&self) -> &LevelId {
        &self.id
    }

    fn kind(&self) -> LevelKind {
        LevelKind::Rule
    }

    async fn infer(&self, input: &I, context: &C) -> LevelOutcome<P> {
        (self.f)(input, context)
    }
}
