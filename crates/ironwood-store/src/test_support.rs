//! Shared fixtures for cache tests: fingerprints, iterables, and mock
//! transaction plumbing.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use ironwood_error::{IronwoodError, Result};
use parking_lot::{Condvar, Mutex};

use crate::adapter::CacheAdapter;
use crate::cache::IterableCache;
use crate::fingerprint::{
    CacheableIterable, CachedIterable, EntityId, FingerprintKey, QueryFingerprint,
};
use crate::policy::QueryCancelPolicy;
use crate::txn::{ReadonlyExecutor, TxnContext};

// ---------------------------------------------------------------------------
// TestFingerprint
// ---------------------------------------------------------------------------

pub struct TestFingerprint {
    key: FingerprintKey,
    consistent: bool,
    expired: AtomicBool,
    birth: AtomicU64,
    pub birth_resets: AtomicUsize,
}

impl TestFingerprint {
    pub fn expire(&self) {
        self.expired.store(true, Ordering::SeqCst);
    }
}

impl QueryFingerprint for TestFingerprint {
    fn key(&self) -> &FingerprintKey {
        &self.key
    }

    fn is_consistent(&self) -> bool {
        self.consistent
    }

    fn is_expired(&self) -> bool {
        self.expired.load(Ordering::SeqCst)
    }

    fn birth_time(&self) -> u64 {
        self.birth.load(Ordering::SeqCst)
    }

    fn reset_birth_time(&self) {
        self.birth_resets.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn fingerprint(shape: &[u8], consistent: bool) -> Arc<TestFingerprint> {
    Arc::new(TestFingerprint {
        key: FingerprintKey::from_shape(shape),
        consistent,
        expired: AtomicBool::new(false),
        birth: AtomicU64::new(0),
        birth_resets: AtomicUsize::new(0),
    })
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

/// Rendezvous used to hold a materialisation mid-flight.
#[derive(Default)]
pub struct Gate {
    started: Mutex<bool>,
    started_cv: Condvar,
    released: Mutex<bool>,
    released_cv: Condvar,
}

impl Gate {
    /// Block until a materialisation reaches the gate.
    pub fn wait_started(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut started = self.started.lock();
        while !*started {
            if self.started_cv.wait_until(&mut started, deadline).timed_out() {
                return false;
            }
        }
        true
    }

    /// Let the blocked materialisation continue.
    pub fn release(&self) {
        let mut released = self.released.lock();
        *released = true;
        self.released_cv.notify_all();
    }

    fn enter(&self) {
        {
            let mut started = self.started.lock();
            *started = true;
            self.started_cv.notify_all();
        }
        let mut released = self.released.lock();
        while !*released {
            self.released_cv.wait(&mut released);
        }
    }
}

// ---------------------------------------------------------------------------
// TestIterable
// ---------------------------------------------------------------------------

pub struct TestIterable {
    fingerprint: Arc<TestFingerprint>,
    items: Vec<EntityId>,
    can_cache: bool,
    thread_safe: bool,
    poll_policy: bool,
    gate: Option<Arc<Gate>>,
    fail_next: Mutex<VecDeque<IronwoodError>>,
    pub materialize_calls: AtomicUsize,
}

impl TestIterable {
    pub fn new(fingerprint: Arc<TestFingerprint>, items: Vec<EntityId>) -> Self {
        Self {
            fingerprint,
            items,
            can_cache: true,
            thread_safe: true,
            poll_policy: false,
            gate: None,
            fail_next: Mutex::new(VecDeque::new()),
            materialize_calls: AtomicUsize::new(0),
        }
    }

    pub fn not_cacheable(mut self) -> Self {
        self.can_cache = false;
        self
    }

    pub fn not_thread_safe(mut self) -> Self {
        self.thread_safe = false;
        self
    }

    /// Materialisation blocks on the returned gate, then polls the
    /// transaction's cancellation policy before finishing.
    pub fn gated(mut self) -> Self {
        self.gate = Some(Arc::new(Gate::default()));
        self.poll_policy = true;
        self
    }

    pub fn gate(&self) -> &Arc<Gate> {
        self.gate.as_ref().expect("iterable built without a gate")
    }

    /// Queue errors returned by upcoming materialisations, in order.
    pub fn fail_with(self, errors: impl IntoIterator<Item = IronwoodError>) -> Self {
        self.fail_next.lock().extend(errors);
        self
    }
}

impl CacheableIterable for TestIterable {
    fn fingerprint(&self) -> Arc<dyn QueryFingerprint> {
        Arc::clone(&self.fingerprint) as Arc<dyn QueryFingerprint>
    }

    fn can_be_cached(&self) -> bool {
        self.can_cache
    }

    fn is_thread_safe(&self) -> bool {
        self.thread_safe
    }

    fn materialize(&self, txn: &dyn TxnContext) -> Result<CachedIterable> {
        self.materialize_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.fail_next.lock().pop_front() {
            return Err(err);
        }
        if let Some(gate) = &self.gate {
            gate.enter();
        }
        if self.poll_policy {
            if let Some(policy) = txn.cancel_policy() {
                policy.check()?;
            }
        }
        Ok(CachedIterable::new(
            Arc::clone(&self.fingerprint) as Arc<dyn QueryFingerprint>,
            self.items.clone(),
        ))
    }
}

// ---------------------------------------------------------------------------
// MockTxn / MockExecutor
// ---------------------------------------------------------------------------

pub struct MockTxn {
    mutable: bool,
    current: bool,
    relevant: bool,
    local: Mutex<Arc<CacheAdapter>>,
    policy: Mutex<Option<Arc<dyn QueryCancelPolicy>>>,
    pub attempts: AtomicUsize,
    pub hits: AtomicUsize,
}

impl MockTxn {
    pub fn new(local: Arc<CacheAdapter>) -> Self {
        Self {
            mutable: false,
            current: true,
            relevant: true,
            local: Mutex::new(local),
            policy: Mutex::new(None),
            attempts: AtomicUsize::new(0),
            hits: AtomicUsize::new(0),
        }
    }

    pub fn mutable(mut self) -> Self {
        self.mutable = true;
        self
    }

    pub fn not_current(mut self) -> Self {
        self.current = false;
        self
    }

    pub fn not_caching_relevant(mut self) -> Self {
        self.relevant = false;
        self
    }
}

impl TxnContext for MockTxn {
    fn is_mutable(&self) -> bool {
        self.mutable
    }

    fn is_current(&self) -> bool {
        self.current
    }

    fn is_caching_relevant(&self) -> bool {
        self.relevant
    }

    fn local_cache(&self) -> Arc<CacheAdapter> {
        Arc::clone(&self.local.lock())
    }

    fn replace_local_cache(&self, adapter: Arc<CacheAdapter>) {
        *self.local.lock() = adapter;
    }

    fn local_cache_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::SeqCst);
    }

    fn local_cache_hit(&self) {
        self.hits.fetch_add(1, Ordering::SeqCst);
    }

    fn set_cancel_policy(&self, policy: Arc<dyn QueryCancelPolicy>) {
        *self.policy.lock() = Some(policy);
    }

    fn cancel_policy(&self) -> Option<Arc<dyn QueryCancelPolicy>> {
        self.policy.lock().clone()
    }
}

/// Opens mock read-only transactions against the cache's current
/// adapter generation, the way a real store snapshots at txn begin.
#[derive(Default)]
pub struct MockExecutor {
    cache: Mutex<Option<std::sync::Weak<IterableCache>>>,
    pub txns_opened: AtomicUsize,
}

impl MockExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Wire the executor to the cache it opens transactions against.
    pub fn attach(&self, cache: &Arc<IterableCache>) {
        *self.cache.lock() = Some(Arc::downgrade(cache));
    }
}

impl ReadonlyExecutor for MockExecutor {
    fn execute_in_readonly_txn(
        &self,
        body: &mut dyn FnMut(&dyn TxnContext) -> Result<()>,
    ) -> Result<()> {
        let cache = self
            .cache
            .lock()
            .clone()
            .and_then(|weak| weak.upgrade())
            .expect("executor not attached to a cache");
        self.txns_opened.fetch_add(1, Ordering::SeqCst);
        let txn = MockTxn::new(cache.current_adapter());
        body(&txn)
    }
}
