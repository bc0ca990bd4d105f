//! Bounded, TTL'd result cache keyed by `Fingerprint`.
//!
//! Modeled directly on the teacher pack's `CachedProvider` response cache:
//! a `std::sync::Mutex`-guarded map, never held across an `.await`, evicted
//! by TTL first and then by an approximate-LRU tuple when still over
//! capacity.

use cie_core::Fingerprint;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::trace;

#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 512,
            ttl: Duration::from_millis(300_000),
        }
    }
}

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    expires_at: Instant,
    hit_count: u64,
}

/// A bounded cache of engine results, keyed by input+scope fingerprint.
///
/// Uses `std::sync::Mutex` rather than `tokio::sync::Mutex`: every critical
/// section below is synchronous and never crosses an `.await` point, so a
/// blocking lock is both correct and cheaper.
pub struct Cache<V> {
    entries: Mutex<HashMap<Fingerprint, Entry<V>>>,
    config: CacheConfig,
}

impl<V: Clone> Cache<V> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Look up a value, evicting it first if its TTL has elapsed.
    /// Increments the entry's hit counter on a live hit.
    pub fn get(&self, key: &Fingerprint) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        match entries.get_mut(key) {
            Some(entry) if entry.expires_at > now => {
                entry.hit_count += 1;
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Insert or replace a value, evicting expired entries and then, if
    /// still over capacity, the entry with the lowest `(hit_count,
    /// inserted_at)` — least-used, and among ties, oldest.
    pub fn put(&self, key: Fingerprint, value: V) {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        entries.retain(|_, e| e.expires_at > now);

        if entries.len() >= self.config.capacity && !entries.contains_key(&key) {
            if let Some(victim) = entries
                .iter()
                .min_by_key(|(_, e)| (e.hit_count, e.inserted_at))
                .map(|(k, _)| k.clone())
            {
                trace!(key = %victim, "evicting least-used cache entry at capacity");
                entries.remove(&victim);
            }
        }

        entries.insert(
            key,
            Entry {
                value,
                inserted_at: now,
                expires_at: now + self.config.ttl,
                hit_count: 0,
            },
        );
    }

    /// Drop every expired entry. Called opportunistically by the engine;
    /// `get`/`put` also self-clean so this is never required for
    /// correctness, only to bound memory between accesses.
    pub fn evict_expired(&self) {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        entries.retain(|_, e| e.expires_at > now);
    }

    pub fn clear(&self) {
        self.entries.lock().expect("cache mutex poisoned").clear();
    }

    pub fn size(&self) -> usize {
        self.entries.lock().expect("cache mutex poisoned").len()
    }
}
