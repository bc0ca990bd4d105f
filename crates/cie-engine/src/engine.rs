//! `CascadeEngine`: the orchestrator (spec §4.1).
//!
//! Owns an ordered list of [`Level`]s, the engine-scope [`Cache`], the
//! [`InflightCoalescer`], a confidence threshold, and a fallback policy.
//! `infer` walks the levels in registration order, short-circuiting the
//! first time a result clears the threshold, then applies the fallback
//! policy and records the outcome in the cache.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cie_cache::{Cache, CacheConfig, InflightCoalescer};
use cie_core::{metrics, CascadeResult, Error, FailureKind, Fingerprint, Level, LevelOutcome};
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::policy::FallbackPolicy;

/// Deterministic, ordered traversal of [`Level`]s with early termination
/// and fallback (spec §4.1).
///
/// `I` is the (owned) input type, `C` the ambient context, `P` the payload
/// type every registered level produces. `infer` takes `context` by value
/// (rather than by reference) because the shared computation it may start
/// is detached onto its own task (see `cie_cache::InflightCoalescer`) and
/// must therefore own everything it touches.
pub struct CascadeEngine<I, C, P> {
    levels: Mutex<Vec<Arc<dyn Level<I, C, P>>>>,
    /// Flips to `true` on the first `infer` call; `register_level` refuses
    /// to run once this is set (spec §4.1 `register_level`).
    served: AtomicBool,
    cache: Arc<Cache<CascadeResult<P>>>,
    coalescer: InflightCoalescer<std::result::Result<CascadeResult<P>, Error>>,
    config: EngineConfig,
}

impl<I, C, P> CascadeEngine<I, C, P>
where
    P: Clone + Send + Sync + 'static,
{
    pub fn new(config: EngineConfig) -> Self {
        let cache = Arc::new(Cache::new(CacheConfig {
            capacity: config.cache_capacity,
            ttl: Duration::from_millis(config.cache_ttl_ms),
        }));
        Self {
            levels: Mutex::new(Vec::new()),
            served: AtomicBool::new(false),
            cache,
            coalescer: InflightCoalescer::new(),
            config,
        }
    }

    /// Convenience constructor: registers every level in order, propagating
    /// the first `ConfigError`.
    pub fn with_levels(
        config: EngineConfig,
        levels: impl IntoIterator<Item = Arc<dyn Level<I, C, P>>>,
    ) -> std::result::Result<Self, Error> {
        let engine = Self::new(config);
        for level in levels {
            engine.register_level(level)?;
        }
        Ok(engine)
    }

    /// Appends a level to the ordering. Fails with `ConfigError` if `id`
    /// collides with an already-registered level, or if the engine has
    /// already served an `infer` call (spec §4.1: "registered levels may
    /// not be removed during the engine's lifetime (rebuild engine to
    /// change topology)").
    pub fn register_level(&self, level: Arc<dyn Level<I, C, P>>) -> std::result::Result<(), Error> {
        if self.served.load(Ordering::SeqCst) {
            return Err(Error::config(
                "cannot register a level after the engine has served a request",
            ));
        }
        let mut levels = self.levels.lock().expect("levels mutex poisoned");
        if levels.iter().any(|existing| existing.id() == level.id()) {
            return Err(Error::config(format!("duplicate level id: {}", level.id())));
        }
        levels.push(level);
        Ok(())
    }

    pub fn cache_size(&self) -> usize {
        self.cache.size()
    }
}

impl<I, C, P> CascadeEngine<I, C, P>
where
    I: Serialize + Send + Sync + 'static,
    C: Send + Sync + 'static,
    P: Clone + Send + Sync + 'static,
{
    /// Primary entry point (spec §4.1 `infer`).
    ///
    /// If another caller is already in flight for the same fingerprint,
    /// this call joins it instead of running its own levels (spec §4.4);
    /// the shared computation runs on its own task so dropping this call
    /// (e.g. racing it in a `select!`) never tears it down for other
    /// waiters (spec §5).
    pub async fn infer(&self, input: I, context: C) -> std::result::Result<CascadeResult<P>, Error> {
        self.served.store(true, Ordering::SeqCst);
        debug!(metric = metrics::INFER_CALLS, "infer called");

        let levels = self.levels.lock().expect("levels mutex poisoned").clone();
        if levels.is_empty() {
            return Err(Error::NoLevelsConfigured);
        }

        let fingerprint = Fingerprint::of(&input, &self.config.fingerprint_scope_key);

        if self.config.cache_enabled {
            if let Some(cached) = self.cache.get(&fingerprint) {
                debug!(metric = metrics::INFER_CACHE_HITS, %fingerprint, "cache hit");
                return Ok(cached.mark_cache_hit());
            }
        }

        let overall_timeout_ms = self.config.overall_timeout_ms;
        let cache_enabled = self.config.cache_enabled;
        let cache = self.cache.clone();
        let config = self.config.clone();

        let (outcome, coalesced) = self
            .coalescer
            .join_or_start(fingerprint, move |cancel| async move {
                let outcome = match overall_timeout_ms {
                    Some(ms) => match tokio::time::timeout(
                        Duration::from_millis(ms),
                        Self::run_cascade(&levels, &input, &context, &config, &cancel),
                    )
                    .await
                    {
                        Ok(outcome) => outcome,
                        Err(_) => Err(Error::Timeout),
                    },
                    None => Self::run_cascade(&levels, &input, &context, &config, &cancel).await,
                };

                // The spawned task, not any individual caller, owns this
                // cache write: it is the one guaranteed to run to
                // completion regardless of who stays around to observe it.
                if let Ok(result) = &outcome {
                    if cache_enabled {
                        cache.put(fingerprint, result.clone());
                    }
                }

                outcome
            })
            .await;

        if coalesced {
            debug!(metric = metrics::INFER_COALESCED_JOINS, %fingerprint, "joined in-flight inference");
        }

        outcome
    }

    async fn run_cascade(
        levels: &[Arc<dyn Level<I, C, P>>],
        input: &I,
        context: &C,
        config: &EngineConfig,
        cancel: &CancellationToken,
    ) -> std::result::Result<CascadeResult<P>, Error> {
        let last_index = levels.len() - 1;
        let mandatory_last = config.fallback_policy == FallbackPolicy::LastLevelMandatory;

        let mut best: Option<CascadeResult<P>> = None;
        let mut failed_levels: Vec<serde_json::Value> = Vec::new();
        let mut met_threshold = false;

        for (index, level) in levels.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let is_last = index == last_index;
            let force_run = mandatory_last && is_last;

            if !force_run && level.skip_predicate(input, context) {
                continue;
            }

            let started = Instant::now();
            let outcome = Self::invoke_level(level.as_ref(), input, context).await;
            let latency_ms = started.elapsed().as_millis() as u64;
            debug!(
                metric = metrics::LEVEL_LATENCY_MS,
                level_id = %level.id(),
                latency_ms,
                "level attempt completed"
            );

            match outcome {
                LevelOutcome::Produced(result) => {
                    let meets = result.meets_threshold(config.confidence_threshold);
                    if best
                        .as_ref()
                        .map_or(true, |current| result.confidence() > current.confidence())
                    {
                        best = Some(result);
                    }
                    if meets {
                        info!(
                            metric = metrics::INFER_THRESHOLD_SHORTCUT,
                            level_id = %level.id(),
                            "threshold shortcut"
                        );
                        met_threshold = true;
                        break;
                    }
                }
                LevelOutcome::Skipped => {}
                LevelOutcome::Failure {
                    kind,
                    recoverable,
                    message,
                } => {
                    warn!(
                        metric = metrics::LEVEL_FAILURES,
                        level_id = %level.id(),
                        kind = kind.as_str(),
                        %message,
                        "level failed"
                    );
                    failed_levels.push(json!({
                        "level_id": level.id().as_str(),
                        "kind": kind.as_str(),
                        "message": message,
                    }));
                    // Under `last_level_mandatory`, the final level always
                    // runs regardless of earlier non-recoverable failures
                    // (spec §4.1 step 5); every other policy aborts here.
                    if !recoverable && !mandatory_last {
                        return Err(Error::InvalidInput(format!("{}: {}", level.id(), message)));
                    }
                }
            }
        }

        Self::finalize(best, failed_levels, met_threshold, config.fallback_policy)
    }

    async fn invoke_level(level: &dyn Level<I, C, P>, input: &I, context: &C) -> LevelOutcome<P> {
        match level.timeout_ms() {
            Some(ms) => {
                match tokio::time::timeout(Duration::from_millis(ms), level.infer(input, context)).await {
                    Ok(outcome) => outcome,
                    Err(_) => LevelOutcome::failure(FailureKind::Timeout, "level timed out"),
                }
            }
            None => level.infer(input, context).await,
        }
    }

    /// Applies the fallback policy once the ordering is exhausted without a
    /// level clearing the threshold (spec §4.1 step 5, §9 Open Questions).
    fn finalize(
        best: Option<CascadeResult<P>>,
        failed_levels: Vec<serde_json::Value>,
        met_threshold: bool,
        fallback_policy: FallbackPolicy,
    ) -> std::result::Result<CascadeResult<P>, Error> {
        let mut result = if met_threshold {
            best.expect("met_threshold implies a result was recorded")
        } else {
            match fallback_policy {
                // `strict` never surfaces a below-threshold result: the
                // only way to reach this branch under `strict` is to
                // exhaust every level without clearing the threshold,
                // which this policy treats as total failure (DESIGN.md
                // Open Question decision).
                FallbackPolicy::Strict => {
                    return Err(Error::all_levels_failed(
                        "no level met the confidence threshold under strict policy",
                    ));
                }
                FallbackPolicy::BestEffort | FallbackPolicy::LastLevelMandatory => match best {
                    Some(result) => result,
                    None => {
                        return Err(Error::all_levels_failed("no level produced a result"));
                    }
                },
            }
        };

        if !failed_levels.is_empty() {
            result
                .metadata_mut()
                .insert("failed_levels".to_string(), serde_json::Value::Array(failed_levels));
        }
        Ok(result)
    }
}
