//! Cache adapter generations.
//!
//! A [`CacheAdapter`] is one immutable snapshot of the fingerprint →
//! cached-iterable mapping. Mutation produces a new generation sharing
//! entry storage with the old one (`Arc`-valued map, cloned map
//! skeleton); the shared current generation is replaced wholesale via
//! pointer-identity compare-and-swap on [`AdapterRef`]. A transaction
//! keeps the generation it opened against until it commits or reverts,
//! so readers never observe a half-mutated cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::fingerprint::{CachedIterable, FingerprintKey};

// ---------------------------------------------------------------------------
// Hit-rate estimator
// ---------------------------------------------------------------------------

/// Attempt/hit counters shared by every generation of one cache.
///
/// `adjust` periodically halves both counters so the rate tracks recent
/// behavior instead of the process lifetime.
#[derive(Debug, Default)]
struct HitRateEstimator {
    attempts: AtomicU64,
    hits: AtomicU64,
}

impl HitRateEstimator {
    fn attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn rate(&self) -> f32 {
        let attempts = self.attempts.load(Ordering::Relaxed);
        if attempts == 0 {
            return 0.0;
        }
        self.hits.load(Ordering::Relaxed) as f32 / attempts as f32
    }

    fn adjust(&self) {
        // Halving both preserves the ratio while aging out history.
        let attempts = self.attempts.load(Ordering::Relaxed);
        let hits = self.hits.load(Ordering::Relaxed);
        self.attempts.store(attempts / 2, Ordering::Relaxed);
        self.hits.store(hits.min(attempts) / 2, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// CacheAdapter
// ---------------------------------------------------------------------------

/// One generation of the iterable cache.
pub struct CacheAdapter {
    generation: u64,
    capacity: usize,
    entries: HashMap<FingerprintKey, Arc<CachedIterable>>,
    hit_rate: Arc<HitRateEstimator>,
}

impl CacheAdapter {
    /// Create the initial empty generation with the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            generation: 0,
            capacity: capacity.max(1),
            entries: HashMap::new(),
            hit_rate: Arc::new(HitRateEstimator::default()),
        }
    }

    /// Monotonic generation number, for diagnostics.
    #[inline]
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Configured capacity in entries.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of cached entries in this generation.
    #[must_use]
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// True while the fill factor is below one half; a sparse cache
    /// admits new entries without deferral.
    #[must_use]
    pub fn is_sparse(&self) -> bool {
        self.entries.len() * 2 < self.capacity
    }

    /// Look up a cached iterable, recording the attempt in the shared
    /// hit-rate estimator.
    #[must_use]
    pub fn get(&self, key: &FingerprintKey) -> Option<Arc<CachedIterable>> {
        self.hit_rate.attempt();
        let found = self.entries.get(key).cloned();
        if found.is_some() {
            self.hit_rate.hit();
        }
        found
    }

    /// Whether `key` is present, without touching the estimator.
    #[must_use]
    pub fn contains(&self, key: &FingerprintKey) -> bool {
        self.entries.contains_key(key)
    }

    /// A new generation with `cached` inserted. At capacity, an
    /// arbitrary entry is evicted first.
    #[must_use]
    pub fn with_cached(&self, cached: Arc<CachedIterable>) -> Self {
        let mut entries = self.entries.clone();
        if entries.len() >= self.capacity {
            if let Some(evict) = entries.keys().next().cloned() {
                entries.remove(&evict);
            }
        }
        entries.insert(cached.fingerprint().key().clone(), cached);
        Self {
            generation: self.generation + 1,
            capacity: self.capacity,
            entries,
            hit_rate: Arc::clone(&self.hit_rate),
        }
    }

    /// A new generation with `key` removed.
    #[must_use]
    pub fn without(&self, key: &FingerprintKey) -> Self {
        let mut entries = self.entries.clone();
        entries.remove(key);
        Self {
            generation: self.generation + 1,
            capacity: self.capacity,
            entries,
            hit_rate: Arc::clone(&self.hit_rate),
        }
    }

    /// Hit rate over recent attempts, in `[0, 1]`.
    #[must_use]
    pub fn hit_rate(&self) -> f32 {
        self.hit_rate.rate()
    }

    /// Age the hit-rate counters. Invoked periodically by the shared
    /// timer.
    pub fn adjust_hit_rate(&self) {
        self.hit_rate.adjust();
    }
}

impl std::fmt::Debug for CacheAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheAdapter")
            .field("generation", &self.generation)
            .field("count", &self.entries.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// AdapterRef
// ---------------------------------------------------------------------------

/// The shared "current generation" slot.
///
/// Replacement is compare-and-swap on pointer identity: a writer that
/// prepared a new generation from snapshot `old` installs it only if
/// `old` is still current. Losing the race means the work is discarded;
/// the world moved on.
pub struct AdapterRef {
    current: Mutex<Arc<CacheAdapter>>,
}

impl AdapterRef {
    /// Create a slot holding `initial`.
    #[must_use]
    pub fn new(initial: CacheAdapter) -> Self {
        Self {
            current: Mutex::new(Arc::new(initial)),
        }
    }

    /// The current generation.
    #[must_use]
    pub fn get(&self) -> Arc<CacheAdapter> {
        Arc::clone(&self.current.lock())
    }

    /// Install `new` iff `old` is still the current generation.
    pub fn compare_and_set(&self, old: &Arc<CacheAdapter>, new: Arc<CacheAdapter>) -> bool {
        let mut current = self.current.lock();
        if Arc::ptr_eq(&current, old) {
            *current = new;
            true
        } else {
            false
        }
    }

    /// Unconditionally replace the current generation.
    pub fn set(&self, new: Arc<CacheAdapter>) {
        *self.current.lock() = new;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::fingerprint::QueryFingerprint;
    use crate::test_support::fingerprint;

    fn cached(shape: &[u8]) -> Arc<CachedIterable> {
        let fp = fingerprint(shape, true);
        Arc::new(CachedIterable::new(fp, vec![1, 2, 3]))
    }

    #[test]
    fn generations_are_snapshots() {
        let g0 = Arc::new(CacheAdapter::new(16));
        let entry = cached(b"q1");
        let g1 = Arc::new(g0.with_cached(Arc::clone(&entry)));

        assert_eq!(g0.count(), 0, "old generation untouched");
        assert_eq!(g1.count(), 1);
        assert_eq!(g1.generation(), g0.generation() + 1);
        assert!(
            g1.get(entry.fingerprint().key())
                .is_some_and(|found| Arc::ptr_eq(&found, &entry))
        );

        let g2 = g1.without(entry.fingerprint().key());
        assert_eq!(g1.count(), 1);
        assert_eq!(g2.count(), 0);
    }

    #[test]
    fn compare_and_set_is_pointer_identity() {
        let slot = AdapterRef::new(CacheAdapter::new(16));
        let g0 = slot.get();
        let g1 = Arc::new(g0.with_cached(cached(b"q1")));
        let g1b = Arc::new(g0.with_cached(cached(b"q2")));

        assert!(slot.compare_and_set(&g0, Arc::clone(&g1)));
        assert!(
            !slot.compare_and_set(&g0, g1b),
            "stale snapshot must not install"
        );
        assert!(Arc::ptr_eq(&slot.get(), &g1));
    }

    #[test]
    fn sparse_threshold() {
        let mut adapter = CacheAdapter::new(4);
        assert!(adapter.is_sparse());
        adapter = adapter.with_cached(cached(b"a"));
        assert!(adapter.is_sparse(), "1 of 4 is sparse");
        adapter = adapter.with_cached(cached(b"b"));
        assert!(!adapter.is_sparse(), "2 of 4 is no longer sparse");
    }

    #[test]
    fn capacity_evicts_on_insert() {
        let mut adapter = CacheAdapter::new(2);
        adapter = adapter.with_cached(cached(b"a"));
        adapter = adapter.with_cached(cached(b"b"));
        adapter = adapter.with_cached(cached(b"c"));
        assert_eq!(adapter.count(), 2);
    }

    #[test]
    fn hit_rate_tracks_and_ages() {
        let adapter = CacheAdapter::new(8);
        let entry = cached(b"q");
        let adapter = adapter.with_cached(Arc::clone(&entry));

        let miss_key = fingerprint(b"other", true);
        assert!(adapter.get(entry.fingerprint().key()).is_some());
        assert!(adapter.get(miss_key.key()).is_none());
        assert!((adapter.hit_rate() - 0.5).abs() < f32::EPSILON);

        adapter.adjust_hit_rate();
        assert!(adapter.hit_rate() <= 0.5, "aging never raises the rate");
    }
}
