//! The value a cascade produces: `(payload, confidence, produced_by, metadata)`.

use crate::level::LevelId;
use serde_json::Value;
use std::collections::HashMap;

/// Free-form metadata: short string keys to primitive JSON values
/// (`latency_ms`, `tokens_used`, `cache_hit`, `attempts`, ...).
pub type Metadata = HashMap<String, Value>;

/// Which family of level produced a result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LevelKind {
    Rule,
    FastModel,
    Llm,
    Custom,
}

impl LevelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LevelKind::Rule => "rule",
            LevelKind::FastModel => "fast_model",
            LevelKind::Llm => "llm",
            LevelKind::Custom => "custom",
        }
    }
}

/// Immutable value carrying a level's payload, confidence, and provenance.
///
/// Generic over the payload type so each domain (emotion, NER, intent, ...)
/// gets a typed result rather than an opaque dictionary; CIE itself never
/// inspects `payload`.
#[derive(Clone, Debug)]
pub struct CascadeResult<P> {
    payload: P,
    confidence: f64,
    produced_by: LevelId,
    level_kind: LevelKind,
    metadata: Metadata,
}

impl<P> CascadeResult<P> {
    /// Construct a result, clamping `confidence` into `[0, 1]`.
    ///
    /// Clamping (not rejecting) an out-of-range confidence is a deliberate
    /// cascade-wide invariant (spec §4.1 edge cases): a single badly-behaved
    /// level should degrade gracefully rather than abort the whole cascade.
    /// Sets `metadata["confidence_clamped"] = true` when clamping occurred.
    pub fn new(
        payload: P,
        confidence: f64,
        produced_by: LevelId,
        level_kind: LevelKind,
    ) -> Self {
        let mut metadata = Metadata::new();
        let clamped = clamp_confidence(confidence);
        if clamped != confidence || !confidence.is_finite() {
            metadata.insert("confidence_clamped".to_string(), Value::Bool(true));
        }
        Self {
            payload,
            confidence: clamped,
            produced_by,
            level_kind,
            metadata,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn into_payload(self) -> P {
        self.payload
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn produced_by(&self) -> &LevelId {
        &self.produced_by
    }

    pub fn level_kind(&self) -> LevelKind {
        self.level_kind
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    pub fn meets_threshold(&self, threshold: f64) -> bool {
        self.confidence >= threshold
    }

    /// True once [`mark_cache_hit`](Self::mark_cache_hit) has been applied.
    pub fn is_cache_hit(&self) -> bool {
        matches!(self.metadata.get("cache_hit"), Some(Value::Bool(true)))
    }

    pub fn mark_cache_hit(mut self) -> Self {
        self.metadata.insert("cache_hit".to_string(), Value::Bool(true));
        self
    }
}

fn clamp_confidence(confidence: f64) -> f64 {
    if !confidence.is_finite() {
        return 0.0;
    }
    confidence.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::LevelId;

    #[test]
    fn clamps_above_one() {
        let r = CascadeResult::new("x", 1.5, LevelId::new("rule_1"), LevelKind::Rule);
        assert_eq!(r.confidence(), 1.0);
        assert_eq!(r.metadata().get("confidence_clamped"), Some(&Value::Bool(true)));
    }

    #[test]
    fn clamps_below_zero() {
        let r = CascadeResult::new("x", -0.3, LevelId::new("rule_1"), LevelKind::Rule);
        assert_eq!(r.confidence(), 0.0);
        assert_eq!(r.metadata().get("confidence_clamped"), Some(&Value::Bool(true)));
    }

    #[test]
    fn non_finite_confidence_clamps_to_zero() {
        let r = CascadeResult::new("x", f64::NAN, LevelId::new("rule_1"), LevelKind::Rule);
        assert_eq!(r.confidence(), 0.0);
        assert!(r.metadata().contains_key("confidence_clamped"));
    }

    #[test]
    fn in_range_confidence_is_not_flagged() {
        let r = CascadeResult::new("x", 0.42, LevelId::new("rule_1"), LevelKind::Rule);
        assert_eq!(r.confidence(), 0.42);
        assert!(!r.metadata().contains_key("confidence_clamped"));
    }

    #[test]
    fn meets_threshold_is_inclusive() {
        let r = CascadeResult::new("x", 0.7, LevelId::new("rule_1"), LevelKind::Rule);
        assert!(r.meets_threshold(0.7));
        assert!(!r.meets_threshold(0.71));
    }
}
