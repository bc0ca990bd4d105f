//! Request coalescing: concurrent callers sharing a fingerprint observe a
//! single execution rather than each repeating the work (spec §4.4/§6
//! `cie.infer.coalesced_joins`).
//!
//! Grounded in the teacher's `agenticlaw-agent::queue` cancellation
//! plumbing: a `CancellationToken` handed to the in-flight computation, and
//! a broadcast channel (capacity 1) standing in for the teacher's
//! `oneshot`-per-waiter pattern, since here the number of waiters is
//! unknown up front.
//!
//! The computation itself runs on its own `tokio::spawn`ed task rather than
//! inline in whichever caller happened to register it first: if it ran
//! inline, that caller dropping its own future (racing `infer` against its
//! own `select!`, exactly the pattern this module's callers use) would tear
//! the computation down for every other waiter too. Detaching it onto a
//! task means only the last waiter standing can cancel it (spec §5).

use cie_core::Fingerprint;
use dashmap::mapref::entry::Entry as DashEntry;
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

struct Pending<V> {
    tx: broadcast::Sender<V>,
    waiters: AtomicUsize,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// RAII waiter count: decrements on drop, and cancels the shared
/// computation if this was the last waiter standing.
struct WaiterGuard<V> {
    pending: Arc<Pending<V>>,
}

impl<V> Drop for WaiterGuard<V> {
    fn drop(&mut self) {
        if self.pending.waiters.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.pending.cancel.cancel();
        }
    }
}

/// Per-fingerprint in-flight computation registry.
///
/// Cloning an `InflightCoalescer` is cheap and shares the same registry
/// (`Arc<DashMap<..>>`), matching how the engine hands one coalescer to
/// many concurrent callers.
pub struct InflightCoalescer<V: Clone + Send + Sync + 'static> {
    pending: Arc<DashMap<Fingerprint, Arc<Pending<V>>>>,
}

impl<V: Clone + Send + Sync + 'static> Clone for InflightCoalescer<V> {
    fn clone(&self) -> Self {
        Self {
            pending: self.pending.clone(),
        }
    }
}

impl<V: Clone + Send + Sync + 'static> Default for InflightCoalescer<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + Send + Sync + 'static> InflightCoalescer<V> {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
        }
    }

    /// Join an in-flight computation for `key`, or become the one that
    /// starts it. The winning caller's `compute` runs on its own spawned
    /// task, detached from that caller's own future: if the caller that
    /// started it is dropped (cancelled) while other callers are still
    /// waiting on the result, those other callers are unaffected and the
    /// computation keeps running. Only once every waiter (including the
    /// starter) has dropped out does `compute`'s `CancellationToken` fire.
    ///
    /// Returns `(value, coalesced)`: `coalesced` is `false` for the single
    /// caller that actually started `compute`, `true` for every other
    /// caller that observed its result.
    pub async fn join_or_start<F, Fut>(&self, key: Fingerprint, compute: F) -> (V, bool)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let mut compute = Some(compute);
        loop {
            if let Some(entry) = self.pending.get(&key) {
                let pending = entry.value().clone();
                drop(entry);
                pending.waiters.fetch_add(1, Ordering::SeqCst);
                let _guard = WaiterGuard {
                    pending: pending.clone(),
                };
                let mut rx = pending.tx.subscribe();
                match rx.recv().await {
                    Ok(value) => return (value, true),
                    // sender dropped without publishing (panic in `compute`
                    // or a cancellation that raced the send); retry as if
                    // the entry had never existed.
                    Err(_) => continue,
                }
            }

            let (tx, _rx) = broadcast::channel(1);
            // Subscribe before spawning: a `broadcast` receiver only sees
            // messages sent after it subscribes, so subscribing after the
            // spawn risks missing a `send` that races ahead of us.
            let mut my_rx = tx.subscribe();
            let cancel = CancellationToken::new();

            let fut = compute
                .take()
                .expect("compute is only consumed once per loop iteration")(
                cancel.clone()
            );
            debug!(%key, "starting coalesced computation");
            let pending_map = self.pending.clone();
            let task_tx = tx.clone();
            let task_key = key;
            let handle = tokio::spawn(async move {
                let value = fut.await;
                pending_map.remove(&task_key);
                let _ = task_tx.send(value);
            });

            let pending = Arc::new(Pending {
                tx,
                waiters: AtomicUsize::new(1),
                cancel,
                handle,
            });

            match self.pending.entry(key) {
                DashEntry::Occupied(_) => {
                    // Lost the registration race to a concurrent starter;
                    // abort this redundant spawn and retry as a joiner.
                    trace!(%key, "lost coalescer registration race, retrying as joiner");
                    pending.cancel.cancel();
                    pending.handle.abort();
                    continue;
                }
                DashEntry::Vacant(slot) => {
                    slot.insert(pending.clone());
                }
            }

            let _guard = WaiterGuard {
                pending: pending.clone(),
            };
            match my_rx.recv().await {
                Ok(value) => return (value, false),
                Err(_) => continue,
            }
        }
    }

    /// Current waiter count for a fingerprint still in flight, or 0.
    pub fn waiter_count(&self, key: &Fingerprint) -> usize {
        self.pending
            .get(key)
            .map(|p| p.waiters.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub fn is_inflight(&self, key: &Fingerprint) -> bool {
        self.pending.contains_key(key)
    }
}
