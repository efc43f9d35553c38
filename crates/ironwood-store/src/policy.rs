//! Query-cancellation policy for background caching jobs.

use std::sync::Arc;

use ironwood_error::{CancelReason, IronwoodError, Result};
use ironwood_types::{Clock, StoreConfig};
use parking_lot::Mutex;

use crate::adapter::{AdapterRef, CacheAdapter};

/// Decides whether a long-running query must stop.
///
/// Installed on a transaction by the caching orchestrator;
/// materialisation polls [`QueryCancelPolicy::check`] between units of
/// work.
pub trait QueryCancelPolicy: Send + Sync {
    /// Whether the computation must stop now.
    fn need_to_cancel(&self) -> bool;

    /// The error a cancelled computation fails with.
    fn cancel_error(&self) -> IronwoodError;

    /// Fail if cancellation is due; the usual polling entry point.
    fn check(&self) -> Result<()> {
        if self.need_to_cancel() {
            Err(self.cancel_error())
        } else {
            Ok(())
        }
    }
}

/// Cancellation policy for one caching job.
///
/// A consistent job must also stop when the shared adapter generation it
/// captured is replaced: its result would be installed into a world that
/// no longer exists. Inconsistent (counts-only) jobs only run against
/// the clock, with the counts budget.
pub struct CachingCancelPolicy {
    consistent: bool,
    start_time: u64,
    caching_timeout: u64,
    start_caching_timeout: u64,
    clock: Arc<dyn Clock>,
    shared: Arc<AdapterRef>,
    local: Mutex<Option<Arc<CacheAdapter>>>,
}

impl CachingCancelPolicy {
    /// Create a policy for a job enqueued now. `consistent` selects the
    /// full-iterable timeout budget; otherwise the counts budget
    /// applies.
    #[must_use]
    pub fn new(
        consistent: bool,
        config: &StoreConfig,
        clock: Arc<dyn Clock>,
        shared: Arc<AdapterRef>,
    ) -> Self {
        let caching_timeout = if consistent {
            config.entity_iterable_cache_caching_timeout
        } else {
            config.entity_iterable_cache_counts_caching_timeout
        };
        Self {
            consistent,
            start_time: clock.millis(),
            caching_timeout,
            start_caching_timeout: config.entity_iterable_cache_start_caching_timeout,
            clock,
            shared,
            local: Mutex::new(None),
        }
    }

    /// Whether the job is in the consistent class.
    #[inline]
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        self.consistent
    }

    /// Whether the job may still start at `now`: it abandons instead of
    /// starting once it has waited out the start budget on the queue.
    #[must_use]
    pub fn can_start_at(&self, now: u64) -> bool {
        now.saturating_sub(self.start_time) < self.start_caching_timeout
    }

    /// Capture the adapter generation the job's transaction opened
    /// against. Called once when the job begins executing.
    pub fn set_local_cache(&self, local: Arc<CacheAdapter>) {
        *self.local.lock() = Some(local);
    }

    fn adapter_obsolete(&self) -> bool {
        if !self.consistent {
            return false;
        }
        match &*self.local.lock() {
            Some(local) => !std::sync::Arc::ptr_eq(&self.shared.get(), local),
            None => false,
        }
    }
}

impl QueryCancelPolicy for CachingCancelPolicy {
    fn need_to_cancel(&self) -> bool {
        self.adapter_obsolete()
            || self.clock.millis().saturating_sub(self.start_time) > self.caching_timeout
    }

    fn cancel_error(&self) -> IronwoodError {
        let reason = if self.adapter_obsolete() {
            CancelReason::CacheAdapterObsolete
        } else {
            CancelReason::JobOverdue
        };
        IronwoodError::cancelled(reason)
    }
}

#[cfg(test)]
mod tests {
    use ironwood_types::ManualClock;

    use super::*;

    fn setup(consistent: bool) -> (Arc<ManualClock>, Arc<AdapterRef>, CachingCancelPolicy) {
        let clock = Arc::new(ManualClock::at(1_000));
        let shared = Arc::new(AdapterRef::new(CacheAdapter::new(8)));
        let config = StoreConfig {
            entity_iterable_cache_caching_timeout: 10_000,
            entity_iterable_cache_counts_caching_timeout: 100_000,
            entity_iterable_cache_start_caching_timeout: 7_000,
            ..StoreConfig::default()
        };
        let policy = CachingCancelPolicy::new(
            consistent,
            &config,
            Arc::<ManualClock>::clone(&clock),
            Arc::clone(&shared),
        );
        (clock, shared, policy)
    }

    #[test]
    fn start_budget() {
        let (clock, _shared, policy) = setup(true);
        assert!(policy.can_start_at(clock.millis()));
        assert!(policy.can_start_at(1_000 + 6_999));
        assert!(!policy.can_start_at(1_000 + 7_000));
    }

    #[test]
    fn overdue_after_timeout() {
        let (clock, shared, policy) = setup(true);
        policy.set_local_cache(shared.get());
        assert!(!policy.need_to_cancel());

        clock.advance(10_001);
        assert!(policy.need_to_cancel());
        assert!(matches!(
            policy.cancel_error(),
            IronwoodError::TooLongInstantiation {
                reason: CancelReason::JobOverdue
            }
        ));
    }

    #[test]
    fn consistent_job_cancels_on_adapter_swap() {
        let (_clock, shared, policy) = setup(true);
        let local = shared.get();
        policy.set_local_cache(Arc::clone(&local));
        assert!(!policy.need_to_cancel());

        let next = Arc::new(local.without(&crate::FingerprintKey::from_shape(b"swap")));
        assert!(shared.compare_and_set(&local, next));
        assert!(policy.need_to_cancel());
        assert!(matches!(
            policy.cancel_error(),
            IronwoodError::TooLongInstantiation {
                reason: CancelReason::CacheAdapterObsolete
            }
        ));
    }

    #[test]
    fn inconsistent_job_ignores_adapter_swap() {
        let (_clock, shared, policy) = setup(false);
        let local = shared.get();
        policy.set_local_cache(Arc::clone(&local));

        let next = Arc::new(local.without(&crate::FingerprintKey::from_shape(b"swap")));
        assert!(shared.compare_and_set(&local, next));
        assert!(!policy.need_to_cancel(), "counts jobs only race the clock");
    }
}
