//! The entity-iterable cache controller.
//!
//! `put_if_not_cached` is the single entry point the query layer calls
//! on every evaluable iterable: it answers with a cached result, a
//! synchronously materialised one (only when the caller already is a
//! caching worker), or the original uncached iterable while a
//! background job fills the cache. The controller never lets a
//! caching-layer error escape to the query path.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use ironwood_error::IronwoodError;
use ironwood_exec::{
    ExpirablePeriodicTask, Job, JobIdentity, JobProcessor, JobShard, Priority, Reschedule,
    SharedTimer,
};
use ironwood_types::{Clock, StoreConfig, SystemClock};
use tracing::{debug, error, info};

use crate::adapter::{AdapterRef, CacheAdapter};
use crate::deferred::{Admission, DeferredAdmission};
use crate::fingerprint::{CacheableIterable, CachedIterable, FingerprintKey, QueryFingerprint};
use crate::object_cache::ConcurrentObjectCache;
use crate::policy::{CachingCancelPolicy, QueryCancelPolicy};
use crate::stats::CacheStatistics;
use crate::txn::{ReadonlyExecutor, TxnContext};

/// Materialisations slower than this are logged at info level.
const SLOW_CACHING_LOG_THRESHOLD_MS: u64 = 1_000;

/// What `put_if_not_cached` handed back.
#[derive(Debug, Clone)]
pub enum CacheOutcome {
    /// A cached (or just-materialised) result.
    Cached(Arc<CachedIterable>),
    /// Keep using the original iterable; the cache may fill in the
    /// background.
    Uncached,
}

impl CacheOutcome {
    /// The cached result, if any.
    #[must_use]
    pub fn cached(&self) -> Option<&Arc<CachedIterable>> {
        match self {
            Self::Cached(cached) => Some(cached),
            Self::Uncached => None,
        }
    }
}

/// The concurrent, multi-generation iterable result cache.
pub struct IterableCache {
    config: StoreConfig,
    clock: Arc<dyn Clock>,
    adapter: Arc<AdapterRef>,
    deferred: DeferredAdmission,
    counts: ConcurrentObjectCache<FingerprintKey, i64>,
    stats: CacheStatistics,
    processor: Arc<JobProcessor>,
    executor: Arc<dyn ReadonlyExecutor>,
    caching_disabled: AtomicBool,
    /// Back-reference handed to caching jobs; jobs outlive no cache.
    self_ref: std::sync::Weak<IterableCache>,
}

impl IterableCache {
    /// Build the cache, spawn its worker pool, and register the
    /// periodic hit-rate adjuster.
    #[must_use]
    pub fn new(config: StoreConfig, executor: Arc<dyn ReadonlyExecutor>) -> Arc<Self> {
        Self::with_clock(config, executor, Arc::new(SystemClock))
    }

    /// Like [`IterableCache::new`] with an explicit clock.
    #[must_use]
    pub fn with_clock(
        config: StoreConfig,
        executor: Arc<dyn ReadonlyExecutor>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let adapter = Arc::new(AdapterRef::new(CacheAdapter::new(
            config.entity_iterable_cache_size,
        )));
        let cache = Arc::new_cyclic(|self_ref| Self {
            deferred: DeferredAdmission::new(&config),
            counts: ConcurrentObjectCache::new(config.entity_iterable_cache_counts_cache_size),
            stats: CacheStatistics::default(),
            processor: Arc::new(JobProcessor::new(
                "entity-iterable-cache",
                config.entity_iterable_cache_thread_count,
            )),
            executor,
            caching_disabled: AtomicBool::new(config.is_caching_disabled),
            clock,
            adapter,
            config,
            self_ref: self_ref.clone(),
        });
        SharedTimer::register(Arc::new(CacheHitRateAdjuster {
            cache: Arc::downgrade(&cache),
        }));
        cache
    }

    // --- Lookup / admission -------------------------------------------------

    /// Memoise `iterable` if policy allows, returning whatever the
    /// query layer should iterate now.
    pub fn put_if_not_cached(
        &self,
        iterable: &Arc<dyn CacheableIterable>,
        txn: &dyn TxnContext,
    ) -> CacheOutcome {
        if self.is_caching_disabled() || !iterable.can_be_cached() {
            return CacheOutcome::Uncached;
        }

        let fingerprint = iterable.fingerprint();
        let key = fingerprint.key();
        let local = txn.local_cache();

        txn.local_cache_attempt();

        if let Some(cached) = local.get(key) {
            if cached.is_expired() {
                txn.replace_local_cache(Arc::new(local.without(key)));
            } else {
                txn.local_cache_hit();
                self.stats.inc_total_hits();
                return CacheOutcome::Cached(cached);
            }
        }

        self.stats.inc_total_misses();

        if txn.is_mutable() || !txn.is_current() || !txn.is_caching_relevant() {
            return CacheOutcome::Uncached;
        }

        // A well-filled cache admits only fingerprints that keep coming
        // back: first sighting starts the clock, admission needs a
        // second sighting outside the deferred window.
        if !local.is_sparse()
            && self.deferred.check(key, self.clock.millis()) == Admission::Deferred
        {
            return CacheOutcome::Uncached;
        }

        if self.processor.is_dispatcher_thread() {
            // Already on a caching worker: materialise in place instead
            // of queueing a job behind ourselves.
            return match iterable.materialize(txn) {
                Ok(cached) => {
                    let cached = Arc::new(cached);
                    self.admit(&txn.local_cache(), Arc::clone(&cached));
                    CacheOutcome::Cached(cached)
                }
                Err(err) => {
                    debug!(error = %err, "synchronous materialisation failed");
                    CacheOutcome::Uncached
                }
            };
        }

        self.enqueue_job(Arc::clone(iterable), true);
        CacheOutcome::Uncached
    }

    /// Install `cached` into a new generation derived from `local`.
    ///
    /// Succeeds only while `local` is still the shared current
    /// generation; otherwise the result is discarded, because the world
    /// moved on while it was being computed.
    pub fn admit(&self, local: &Arc<CacheAdapter>, cached: Arc<CachedIterable>) -> bool {
        let next = Arc::new(local.with_cached(cached));
        self.adapter.compare_and_set(local, next)
    }

    // --- Counts sub-cache ---------------------------------------------------

    /// Cached cardinality for `key`, if known.
    #[must_use]
    pub fn get_cached_count(&self, key: &FingerprintKey) -> Option<i64> {
        let result = self.counts.get(key);
        if result.is_some() {
            self.stats.inc_total_count_hits();
        } else {
            self.stats.inc_total_count_misses();
        }
        result
    }

    /// Cardinality of `iterable`, from the counts sub-cache when
    /// possible. Returns -1 when unknown; a caching worker computes
    /// synchronously instead, and other threads schedule an
    /// asynchronous counts job when the iterable tolerates one.
    pub fn get_cached_count_of(
        &self,
        iterable: &Arc<dyn CacheableIterable>,
        txn: &dyn TxnContext,
    ) -> i64 {
        let fingerprint = iterable.fingerprint();
        if let Some(count) = self.get_cached_count(fingerprint.key()) {
            return count;
        }
        if self.processor.is_dispatcher_thread() {
            match iterable.materialize(txn) {
                Ok(cached) => {
                    let count = cached.len() as i64;
                    self.set_cached_count(fingerprint.key(), count);
                    return count;
                }
                Err(err) => {
                    debug!(error = %err, "synchronous count materialisation failed");
                    return -1;
                }
            }
        }
        if iterable.is_thread_safe() {
            self.enqueue_job(Arc::clone(iterable), false);
        }
        -1
    }

    /// Record a known cardinality.
    pub fn set_cached_count(&self, key: &FingerprintKey, count: i64) {
        self.counts.put(key.clone(), count);
    }

    // --- Back-pressure and management ---------------------------------------

    /// Back-pressure predicate: more jobs waiting than entries cached
    /// means the workers are not keeping up and enqueueing more is
    /// waste.
    #[must_use]
    pub fn is_caching_queue_full(&self) -> bool {
        self.processor.pending_jobs() > self.adapter.get().count()
    }

    /// Whether the calling thread is one of the caching workers.
    #[must_use]
    pub fn is_dispatcher_thread(&self) -> bool {
        self.processor.is_dispatcher_thread()
    }

    /// Drop every cached iterable, deferred sighting, and count.
    pub fn clear(&self) {
        self.adapter.set(Arc::new(CacheAdapter::new(
            self.config.entity_iterable_cache_size,
        )));
        self.deferred.clear();
        self.counts.clear();
    }

    /// The shared current adapter generation.
    #[must_use]
    pub fn current_adapter(&self) -> Arc<CacheAdapter> {
        self.adapter.get()
    }

    /// Compare-and-swap the shared adapter generation; the only way a
    /// new generation becomes visible.
    pub fn compare_and_set_cache_adapter(
        &self,
        old: &Arc<CacheAdapter>,
        new: Arc<CacheAdapter>,
    ) -> bool {
        self.adapter.compare_and_set(old, new)
    }

    /// Entries in the current generation.
    #[must_use]
    pub fn count(&self) -> usize {
        self.adapter.get().count()
    }

    /// Hit rate of the full-iterable cache.
    #[must_use]
    pub fn hit_rate(&self) -> f32 {
        self.adapter.get().hit_rate()
    }

    /// Hit rate of the counts sub-cache.
    #[must_use]
    pub fn counts_hit_rate(&self) -> f32 {
        self.counts.hit_rate()
    }

    /// Telemetry counters.
    #[must_use]
    pub fn stats(&self) -> &CacheStatistics {
        &self.stats
    }

    /// The worker pool (exposed for embedding and tests).
    #[must_use]
    pub fn processor(&self) -> &Arc<JobProcessor> {
        &self.processor
    }

    /// Runtime kill switch.
    pub fn set_caching_disabled(&self, disabled: bool) {
        self.caching_disabled.store(disabled, Ordering::Relaxed);
    }

    /// Whether the kill switch is on.
    #[must_use]
    pub fn is_caching_disabled(&self) -> bool {
        self.caching_disabled.load(Ordering::Relaxed)
    }

    fn string_presentation(&self, fingerprint: &dyn QueryFingerprint) -> String {
        if self.config.entity_iterable_cache_use_human_readable {
            fingerprint.describe()
        } else {
            format!("fingerprint@{:016x}", fingerprint.key().hash())
        }
    }

    fn enqueue_job(&self, iterable: Arc<dyn CacheableIterable>, consistent: bool) {
        let fingerprint = iterable.fingerprint();
        let policy = Arc::new(CachingCancelPolicy::new(
            consistent && fingerprint.is_consistent(),
            &self.config,
            Arc::clone(&self.clock),
            Arc::clone(&self.adapter),
        ));
        let job = Arc::new(CachingJob {
            cache: self.self_ref.clone(),
            iterable,
            fingerprint,
            consistent,
            policy,
            conflict: AtomicBool::new(false),
            requeued: AtomicBool::new(false),
        });
        if !self.is_caching_queue_full() && self.processor.queue(job, Priority::Normal) {
            self.stats.inc_total_jobs_enqueued();
            if !consistent {
                self.stats.inc_total_count_jobs_enqueued();
            }
        } else {
            self.stats.inc_total_jobs_non_queued();
        }
    }
}

// ---------------------------------------------------------------------------
// CachingJob
// ---------------------------------------------------------------------------

/// One asynchronous materialisation.
///
/// Identified by `(fingerprint, consistency class)`: equal jobs coalesce
/// on the queue, so at most one materialisation per fingerprint and
/// class is in flight. Consistent jobs run on the even worker subset,
/// counts jobs on the odd one. The back-reference is weak: a job
/// sitting on the queue must not keep a dropped cache alive.
struct CachingJob {
    cache: std::sync::Weak<IterableCache>,
    iterable: Arc<dyn CacheableIterable>,
    fingerprint: Arc<dyn QueryFingerprint>,
    /// Full-iterable job (true) vs counts-only job (false).
    consistent: bool,
    policy: Arc<CachingCancelPolicy>,
    conflict: AtomicBool,
    requeued: AtomicBool,
}

impl CachingJob {
    fn action(&self) -> &'static str {
        if self.policy.is_consistent() {
            "caching"
        } else {
            "caching (inconsistent)"
        }
    }

    fn run_in_txn(&self, cache: &IterableCache, txn: &dyn TxnContext) -> ironwood_error::Result<()> {
        if !self.fingerprint.is_consistent() {
            // Keep-alive: an inconsistent entry is as good as its most
            // recent materialisation.
            self.fingerprint.reset_birth_time();
        }
        self.policy.set_local_cache(txn.local_cache());
        txn.set_cancel_policy(Arc::clone(&self.policy) as Arc<dyn QueryCancelPolicy>);

        let cached = self.iterable.materialize(txn)?;
        if self.consistent {
            cache.admit(&txn.local_cache(), Arc::new(cached));
        } else {
            cache.set_cached_count(self.fingerprint.key(), cached.len() as i64);
        }
        Ok(())
    }
}

impl Job for CachingJob {
    fn name(&self) -> String {
        match self.cache.upgrade() {
            Some(cache) => format!(
                "caching job for {}",
                cache.string_presentation(self.fingerprint.as_ref())
            ),
            None => "caching job (cache dropped)".to_owned(),
        }
    }

    fn identity(&self) -> JobIdentity {
        JobIdentity(u128::from(self.fingerprint.key().hash()) | (u128::from(self.consistent) << 64))
    }

    fn shard(&self) -> JobShard {
        if self.consistent {
            JobShard::Even
        } else {
            JobShard::Odd
        }
    }

    fn execute(&self) {
        let Some(cache) = self.cache.upgrade() else {
            return;
        };
        let started = cache.clock.millis();
        if cache.is_caching_queue_full() || !self.policy.can_start_at(started) {
            cache.stats.inc_total_jobs_not_started();
            return;
        }
        cache.stats.inc_total_jobs_started();

        let outcome = cache
            .executor
            .execute_in_readonly_txn(&mut |txn| self.run_in_txn(&cache, txn));

        match outcome {
            Ok(()) => {
                let elapsed = cache.clock.millis().saturating_sub(started);
                if elapsed > SLOW_CACHING_LOG_THRESHOLD_MS {
                    info!(
                        action = self.action(),
                        elapsed_ms = elapsed,
                        fingerprint = %cache.string_presentation(self.fingerprint.as_ref()),
                        "cached slowly"
                    );
                }
            }
            Err(IronwoodError::TooLongInstantiation { reason }) => {
                cache.stats.inc_total_jobs_interrupted();
                info!(
                    action = self.action(),
                    reason = %reason,
                    fingerprint = %cache.string_presentation(self.fingerprint.as_ref()),
                    "caching stopped"
                );
            }
            Err(IronwoodError::ReadonlyConflict) => {
                if self.requeued.load(Ordering::Acquire) {
                    cache.stats.inc_total_jobs_interrupted();
                    info!(
                        action = self.action(),
                        "dropping caching job after repeated read-only conflict"
                    );
                } else {
                    error!(
                        action = self.action(),
                        "caching failed with a read-only conflict, re-queueing"
                    );
                    self.conflict.store(true, Ordering::Release);
                }
            }
            Err(err) => {
                error!(action = self.action(), error = %err, "caching job failed");
            }
        }
    }

    fn reschedule(&self) -> Option<Reschedule> {
        // One re-queue per job: a second conflict drops the job.
        if self.conflict.swap(false, Ordering::AcqRel)
            && !self.requeued.swap(true, Ordering::AcqRel)
        {
            Some(Reschedule {
                priority: Priority::BelowNormal,
                delay: Duration::ZERO,
            })
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Periodic hit-rate adjustment
// ---------------------------------------------------------------------------

/// Shared-timer task aging the cache's hit-rate counters.
///
/// Holds only a weak reference: a dropped cache expires the task instead
/// of being pinned by it.
struct CacheHitRateAdjuster {
    cache: std::sync::Weak<IterableCache>,
}

impl ExpirablePeriodicTask for CacheHitRateAdjuster {
    fn is_expired(&self) -> bool {
        self.cache.upgrade().is_none()
    }

    fn run(&self) {
        if let Some(cache) = self.cache.upgrade() {
            cache.current_adapter().adjust_hit_rate();
        }
    }
}
