//! Cache telemetry counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Lifetime counters for the iterable cache. All increments are relaxed;
/// the counters are diagnostics, not synchronisation.
#[derive(Debug, Default)]
pub struct CacheStatistics {
    total_hits: AtomicU64,
    total_misses: AtomicU64,
    total_count_hits: AtomicU64,
    total_count_misses: AtomicU64,
    total_jobs_enqueued: AtomicU64,
    total_jobs_non_queued: AtomicU64,
    total_jobs_started: AtomicU64,
    total_jobs_not_started: AtomicU64,
    total_jobs_interrupted: AtomicU64,
    total_count_jobs_enqueued: AtomicU64,
}

/// Point-in-time copy of [`CacheStatistics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStatisticsSnapshot {
    pub total_hits: u64,
    pub total_misses: u64,
    pub total_count_hits: u64,
    pub total_count_misses: u64,
    pub total_jobs_enqueued: u64,
    pub total_jobs_non_queued: u64,
    pub total_jobs_started: u64,
    pub total_jobs_not_started: u64,
    pub total_jobs_interrupted: u64,
    pub total_count_jobs_enqueued: u64,
}

macro_rules! counters {
    ($($inc:ident => $field:ident),* $(,)?) => {
        impl CacheStatistics {
            $(
                pub fn $inc(&self) {
                    self.$field.fetch_add(1, Ordering::Relaxed);
                }
            )*

            /// Read every counter at once.
            #[must_use]
            pub fn snapshot(&self) -> CacheStatisticsSnapshot {
                CacheStatisticsSnapshot {
                    $($field: self.$field.load(Ordering::Relaxed),)*
                }
            }
        }
    };
}

counters! {
    inc_total_hits => total_hits,
    inc_total_misses => total_misses,
    inc_total_count_hits => total_count_hits,
    inc_total_count_misses => total_count_misses,
    inc_total_jobs_enqueued => total_jobs_enqueued,
    inc_total_jobs_non_queued => total_jobs_non_queued,
    inc_total_jobs_started => total_jobs_started,
    inc_total_jobs_not_started => total_jobs_not_started,
    inc_total_jobs_interrupted => total_jobs_interrupted,
    inc_total_count_jobs_enqueued => total_count_jobs_enqueued,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = CacheStatistics::default();
        stats.inc_total_hits();
        stats.inc_total_hits();
        stats.inc_total_misses();
        stats.inc_total_jobs_interrupted();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_hits, 2);
        assert_eq!(snapshot.total_misses, 1);
        assert_eq!(snapshot.total_jobs_interrupted, 1);
        assert_eq!(snapshot.total_jobs_enqueued, 0);
    }
}
