//! Bounded concurrent object cache.
//!
//! Fixed-capacity, striped into independently locked shards, with
//! approximate LRU eviction per shard (last-touch tick scan). Backs the
//! deferred-admission map and the counts sub-cache: both tolerate
//! losing unrelated entries on admission, so per-shard eviction is
//! enough.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

const SHARD_COUNT: usize = 16;

struct Entry<V> {
    value: V,
    touched: u64,
}

struct Shard<K, V> {
    map: HashMap<K, Entry<V>>,
    tick: u64,
}

impl<K: Hash + Eq + Clone, V> Shard<K, V> {
    fn touch(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn evict_coldest(&mut self) {
        if let Some(coldest) = self
            .map
            .iter()
            .min_by_key(|(_, entry)| entry.touched)
            .map(|(key, _)| key.clone())
        {
            self.map.remove(&coldest);
        }
    }
}

/// A fixed-capacity striped cache with per-shard approximate LRU.
pub struct ConcurrentObjectCache<K, V> {
    shards: Vec<Mutex<Shard<K, V>>>,
    shard_capacity: usize,
    attempts: AtomicU64,
    hits: AtomicU64,
}

impl<K: Hash + Eq + Clone, V: Clone> ConcurrentObjectCache<K, V> {
    /// Create a cache holding roughly `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let shard_capacity = (capacity / SHARD_COUNT).max(1);
        Self {
            shards: (0..SHARD_COUNT)
                .map(|_| {
                    Mutex::new(Shard {
                        map: HashMap::new(),
                        tick: 0,
                    })
                })
                .collect(),
            shard_capacity,
            attempts: AtomicU64::new(0),
            hits: AtomicU64::new(0),
        }
    }

    fn shard_for(&self, key: &K) -> &Mutex<Shard<K, V>> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    /// Look up `key`, refreshing its recency and recording hit/miss.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<V> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        let mut shard = self.shard_for(key).lock();
        let tick = shard.touch();
        match shard.map.get_mut(key) {
            Some(entry) => {
                entry.touched = tick;
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            None => None,
        }
    }

    /// Insert or replace `key`. A full shard evicts its coldest entry
    /// first, which may drop an unrelated key.
    pub fn put(&self, key: K, value: V) {
        let mut shard = self.shard_for(&key).lock();
        let tick = shard.touch();
        if shard.map.len() >= self.shard_capacity && !shard.map.contains_key(&key) {
            shard.evict_coldest();
        }
        shard.map.insert(
            key,
            Entry {
                value,
                touched: tick,
            },
        );
    }

    /// Remove `key` if present.
    pub fn remove(&self, key: &K) {
        self.shard_for(key).lock().map.remove(key);
    }

    /// Total entries across shards.
    #[must_use]
    pub fn count(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().map.len()).sum()
    }

    /// Hit rate over the cache's lifetime so far, in `[0, 1]`.
    #[must_use]
    pub fn hit_rate(&self) -> f32 {
        let attempts = self.attempts.load(Ordering::Relaxed);
        if attempts == 0 {
            return 0.0;
        }
        self.hits.load(Ordering::Relaxed) as f32 / attempts as f32
    }

    /// Drop every entry; counters keep running.
    pub fn clear(&self) {
        for shard in &self.shards {
            shard.lock().map.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_remove() {
        let cache: ConcurrentObjectCache<u64, i64> = ConcurrentObjectCache::new(64);
        cache.put(1, 10);
        cache.put(2, 20);
        assert_eq!(cache.get(&1), Some(10));
        assert_eq!(cache.get(&3), None);
        cache.remove(&1);
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.count(), 1);
    }

    #[test]
    fn bounded_capacity() {
        let cache: ConcurrentObjectCache<u64, u64> = ConcurrentObjectCache::new(32);
        for i in 0..10_000 {
            cache.put(i, i);
        }
        // Each of the 16 shards holds at most capacity/16 entries.
        assert!(cache.count() <= 32);
    }

    #[test]
    fn eviction_prefers_cold_entries() {
        let cache: ConcurrentObjectCache<u64, u64> = ConcurrentObjectCache::new(160);
        // All keys map somewhere; keep one key hot and flood the rest.
        cache.put(7, 77);
        for i in 1000..1400 {
            let _ = cache.get(&7);
            cache.put(i, i);
        }
        assert_eq!(cache.get(&7), Some(77), "hot key survives the flood");
    }

    #[test]
    fn hit_rate_counts() {
        let cache: ConcurrentObjectCache<u64, u64> = ConcurrentObjectCache::new(8);
        cache.put(1, 1);
        let _ = cache.get(&1);
        let _ = cache.get(&2);
        assert!((cache.hit_rate() - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn clear_empties() {
        let cache: ConcurrentObjectCache<u64, u64> = ConcurrentObjectCache::new(8);
        cache.put(1, 1);
        cache.clear();
        assert_eq!(cache.count(), 0);
    }
}
