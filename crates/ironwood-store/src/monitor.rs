//! Stuck-transaction monitor.
//!
//! A periodic job that walks the environment's active transactions: any
//! transaction older than the soft timeout is logged with its creation
//! context, and any older than the hard expiration timeout is forcibly
//! finished. Either timeout set to zero disables that action. The
//! monitor holds only a weak reference to the registry, so a closed
//! environment lets the monitor exit instead of being pinned by it.

use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use ironwood_exec::{Job, JobIdentity, JobProcessor, Priority, Reschedule};
use ironwood_types::{Clock, StoreConfig};
use tracing::error;

/// A transaction as seen by the monitor.
pub trait MonitoredTxn {
    /// Creation time in epoch milliseconds.
    fn created_at(&self) -> u64;

    /// Name of the thread that opened the transaction.
    fn creating_thread(&self) -> &str;

    /// Captured creation stack trace, when trace collection is on.
    fn creation_trace(&self) -> Option<&str>;

    /// Forcibly abort and close the transaction.
    fn finish(&self);
}

/// Iteration over an environment's live transactions.
pub trait TxnRegistry: Send + Sync {
    /// Invoke `f` for every active transaction.
    fn for_each_active_txn(&self, f: &mut dyn FnMut(&dyn MonitoredTxn));
}

static NEXT_MONITOR_ID: AtomicU64 = AtomicU64::new(1);

/// The periodic monitor job.
pub struct StuckTxnMonitor {
    registry: Weak<dyn TxnRegistry>,
    clock: Arc<dyn Clock>,
    check_freq: u64,
    soft_timeout: u64,
    hard_timeout: u64,
    id: u64,
    /// Transactions found past the soft timeout on the latest tick.
    stuck_count: AtomicU64,
}

impl StuckTxnMonitor {
    /// Create the monitor and schedule its first tick on `processor`.
    pub fn start(
        registry: &Arc<dyn TxnRegistry>,
        config: &StoreConfig,
        clock: Arc<dyn Clock>,
        processor: &JobProcessor,
    ) -> Arc<Self> {
        let monitor = Arc::new(Self {
            registry: Arc::downgrade(registry),
            clock,
            check_freq: config.env_monitor_txns_check_freq,
            soft_timeout: config.env_monitor_txns_timeout,
            hard_timeout: config.env_monitor_txns_expiration_timeout,
            id: NEXT_MONITOR_ID.fetch_add(1, Ordering::Relaxed),
            stuck_count: AtomicU64::new(0),
        });
        processor.queue_in(
            Arc::clone(&monitor) as Arc<dyn Job>,
            Duration::from_millis(monitor.check_freq),
            Priority::Normal,
        );
        monitor
    }

    /// Stuck transactions seen on the most recent tick.
    #[must_use]
    pub fn stuck_count(&self) -> u64 {
        self.stuck_count.load(Ordering::Relaxed)
    }

    /// One monitoring pass; exposed for deterministic tests.
    pub fn tick(&self, registry: &dyn TxnRegistry) {
        let now = self.clock.millis();
        let mut stuck = 0u64;
        registry.for_each_active_txn(&mut |txn| {
            let age = now.saturating_sub(txn.created_at());
            if self.soft_timeout > 0 && age > self.soft_timeout {
                if let Some(trace) = txn.creation_trace() {
                    stuck += 1;
                    error!(
                        created_at = txn.created_at(),
                        age_ms = age,
                        thread = txn.creating_thread(),
                        trace,
                        "transaction appears stuck"
                    );
                }
            }
            if self.hard_timeout > 0 && age > self.hard_timeout {
                error!(
                    created_at = txn.created_at(),
                    age_ms = age,
                    thread = txn.creating_thread(),
                    "finishing expired transaction"
                );
                txn.finish();
            }
        });
        self.stuck_count.store(stuck, Ordering::Relaxed);
    }
}

impl Job for StuckTxnMonitor {
    fn name(&self) -> String {
        "stuck transaction monitor".to_owned()
    }

    fn identity(&self) -> JobIdentity {
        // One tick per monitor instance in flight.
        JobIdentity(u128::from(self.id) | (1 << 127))
    }

    fn execute(&self) {
        if let Some(registry) = self.registry.upgrade() {
            self.tick(registry.as_ref());
        }
    }

    fn reschedule(&self) -> Option<Reschedule> {
        // The owning environment dropping its registry ends the loop.
        if self.registry.upgrade().is_some() {
            Some(Reschedule {
                priority: Priority::Normal,
                delay: Duration::from_millis(self.check_freq),
            })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use ironwood_types::ManualClock;
    use parking_lot::Mutex;

    use super::*;

    struct FakeTxn {
        created_at: u64,
        thread: String,
        trace: Option<String>,
        finished: AtomicBool,
    }

    impl MonitoredTxn for FakeTxn {
        fn created_at(&self) -> u64 {
            self.created_at
        }
        fn creating_thread(&self) -> &str {
            &self.thread
        }
        fn creation_trace(&self) -> Option<&str> {
            self.trace.as_deref()
        }
        fn finish(&self) {
            self.finished.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct FakeRegistry {
        txns: Mutex<Vec<Arc<FakeTxn>>>,
    }

    impl TxnRegistry for FakeRegistry {
        fn for_each_active_txn(&self, f: &mut dyn FnMut(&dyn MonitoredTxn)) {
            for txn in self.txns.lock().iter() {
                f(txn.as_ref());
            }
        }
    }

    fn monitor(
        soft: u64,
        hard: u64,
        clock: Arc<ManualClock>,
        registry: &Arc<dyn TxnRegistry>,
    ) -> (Arc<StuckTxnMonitor>, JobProcessor) {
        let processor = JobProcessor::new("monitor-test", 1);
        let config = StoreConfig {
            env_monitor_txns_timeout: soft,
            env_monitor_txns_expiration_timeout: hard,
            env_monitor_txns_check_freq: 3_600_000,
            ..StoreConfig::default()
        };
        let m = StuckTxnMonitor::start(registry, &config, clock, &processor);
        (m, processor)
    }

    fn txn(created_at: u64, trace: bool) -> Arc<FakeTxn> {
        Arc::new(FakeTxn {
            created_at,
            thread: "query-worker-3".to_owned(),
            trace: trace.then(|| "at store::begin_txn".to_owned()),
            finished: AtomicBool::new(false),
        })
    }

    #[test]
    fn soft_timeout_counts_traced_transactions() {
        let clock = Arc::new(ManualClock::at(100_000));
        let registry: Arc<FakeRegistry> = Arc::new(FakeRegistry::default());
        let traced = txn(10_000, true);
        let untraced = txn(10_000, false);
        let fresh = txn(99_500, true);
        registry.txns.lock().extend([
            Arc::clone(&traced),
            Arc::clone(&untraced),
            Arc::clone(&fresh),
        ]);

        let registry_dyn: Arc<dyn TxnRegistry> = registry;
        let (monitor, _processor) = monitor(60_000, 0, clock, &registry_dyn);
        monitor.tick(registry_dyn.as_ref());

        assert_eq!(monitor.stuck_count(), 1, "only old traced txns count");
        assert!(!traced.finished.load(Ordering::SeqCst), "soft timeout never finishes");
    }

    #[test]
    fn hard_timeout_finishes_transactions() {
        let clock = Arc::new(ManualClock::at(500_000));
        let registry: Arc<FakeRegistry> = Arc::new(FakeRegistry::default());
        let expired = txn(0, false);
        let fresh = txn(499_000, false);
        registry
            .txns
            .lock()
            .extend([Arc::clone(&expired), Arc::clone(&fresh)]);

        let registry_dyn: Arc<dyn TxnRegistry> = registry;
        let (monitor, _processor) = monitor(0, 300_000, clock, &registry_dyn);
        monitor.tick(registry_dyn.as_ref());

        assert!(expired.finished.load(Ordering::SeqCst));
        assert!(!fresh.finished.load(Ordering::SeqCst));
    }

    #[test]
    fn zero_timeouts_disable_both_actions() {
        let clock = Arc::new(ManualClock::at(u64::MAX / 2));
        let registry: Arc<FakeRegistry> = Arc::new(FakeRegistry::default());
        let ancient = txn(0, true);
        registry.txns.lock().push(Arc::clone(&ancient));

        let registry_dyn: Arc<dyn TxnRegistry> = registry;
        let (monitor, _processor) = monitor(0, 0, clock, &registry_dyn);
        monitor.tick(registry_dyn.as_ref());

        assert_eq!(monitor.stuck_count(), 0);
        assert!(!ancient.finished.load(Ordering::SeqCst));
    }

    #[test]
    fn reschedule_stops_when_registry_drops() {
        let clock = Arc::new(ManualClock::at(0));
        let registry: Arc<dyn TxnRegistry> = Arc::new(FakeRegistry::default());
        let (monitor, _processor) = monitor(0, 0, clock, &registry);

        assert!(monitor.reschedule().is_some());
        drop(registry);
        assert!(monitor.reschedule().is_none(), "closed environment ends the loop");
    }
}
