//! Deferred admission.
//!
//! Once the cache is no longer sparse, a fingerprint must be seen twice,
//! at least `delay` milliseconds apart, before a caching job is spent on
//! it. The first sighting only records a timestamp; anything probed just
//! once inside the window is never admitted.

use ironwood_types::StoreConfig;

use crate::fingerprint::FingerprintKey;
use crate::object_cache::ConcurrentObjectCache;

/// Outcome of an admission probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Not yet: first sighting, or the delay has not elapsed.
    Deferred,
    /// Seen before, outside the delay window: cache it for real.
    Admit,
}

/// Two-stage admission filter over a bounded first-seen map.
pub struct DeferredAdmission {
    first_seen: ConcurrentObjectCache<FingerprintKey, u64>,
    delay: u64,
}

impl DeferredAdmission {
    /// Build the filter from config: the first-seen map shares the main
    /// cache's capacity, and `delay` is the deferred-admission window.
    #[must_use]
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            first_seen: ConcurrentObjectCache::new(config.entity_iterable_cache_size),
            delay: config.entity_iterable_cache_deferred_delay,
        }
    }

    /// Probe `key` at time `now` (epoch milliseconds).
    pub fn check(&self, key: &FingerprintKey, now: u64) -> Admission {
        match self.first_seen.get(key) {
            None => {
                self.first_seen.put(key.clone(), now);
                Admission::Deferred
            }
            Some(first_seen) if now < first_seen + self.delay => Admission::Deferred,
            Some(_) => Admission::Admit,
        }
    }

    /// Forget every recorded sighting.
    pub fn clear(&self) {
        self.first_seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(delay: u64) -> DeferredAdmission {
        DeferredAdmission::new(&StoreConfig {
            entity_iterable_cache_deferred_delay: delay,
            ..StoreConfig::default()
        })
    }

    #[test]
    fn two_sightings_across_the_window_admit() {
        let filter = filter(500);
        let key = FingerprintKey::from_shape(b"q");
        assert_eq!(filter.check(&key, 0), Admission::Deferred);
        assert_eq!(filter.check(&key, 200), Admission::Deferred);
        assert_eq!(filter.check(&key, 499), Admission::Deferred);
        assert_eq!(filter.check(&key, 500), Admission::Admit);
        assert_eq!(filter.check(&key, 600), Admission::Admit);
    }

    #[test]
    fn single_sighting_never_admits() {
        let filter = filter(500);
        let key = FingerprintKey::from_shape(b"seen-once");
        assert_eq!(filter.check(&key, 100), Admission::Deferred);
        // Distinct keys do not unlock each other.
        let other = FingerprintKey::from_shape(b"other");
        assert_eq!(filter.check(&other, 5_000), Admission::Deferred);
    }

    #[test]
    fn clear_restarts_the_clock() {
        let filter = filter(100);
        let key = FingerprintKey::from_shape(b"q");
        assert_eq!(filter.check(&key, 0), Admission::Deferred);
        filter.clear();
        assert_eq!(filter.check(&key, 1_000), Admission::Deferred);
        assert_eq!(filter.check(&key, 1_200), Admission::Admit);
    }
}
