//! End-to-end wiring: a Patricia tree in an in-memory log, queried
//! through the iterable cache.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use ironwood::{
    CacheAdapter, CacheOutcome, CacheableIterable, CachedIterable, FingerprintKey, IterableCache,
    MemoryLog, NodeImage, PatriciaTreeReader, QueryCancelPolicy, QueryFingerprint,
    ReadonlyExecutor, StoreConfig, TxnContext,
};
use parking_lot::Mutex;

// ---------------------------------------------------------------------------
// Fixture: a small entity index
// ---------------------------------------------------------------------------

/// Keys "user:<id>" mapping to the entity id as a big-endian byte.
fn build_user_index(log: &Arc<MemoryLog>) -> PatriciaTreeReader {
    let mut leaves = Vec::new();
    for id in [1u8, 2, 3] {
        let leaf = NodeImage {
            key_suffix: b"",
            value: Some(&[id]),
            children: &[],
            child_address_length: 0,
            is_root: false,
        }
        .append_to(log)
        .unwrap();
        leaves.push((b'0' + id, leaf));
    }
    let root = NodeImage {
        key_suffix: b"user:",
        value: None,
        children: &leaves,
        child_address_length: 2,
        is_root: true,
    }
    .append_to(log)
    .unwrap();
    PatriciaTreeReader::new(Arc::clone(log) as Arc<dyn ironwood::LogReader>, root)
}

// ---------------------------------------------------------------------------
// Minimal transaction plumbing
// ---------------------------------------------------------------------------

struct TestTxn {
    local: Mutex<Arc<CacheAdapter>>,
    policy: Mutex<Option<Arc<dyn QueryCancelPolicy>>>,
}

impl TestTxn {
    fn new(local: Arc<CacheAdapter>) -> Self {
        Self {
            local: Mutex::new(local),
            policy: Mutex::new(None),
        }
    }
}

impl TxnContext for TestTxn {
    fn is_mutable(&self) -> bool {
        false
    }
    fn is_current(&self) -> bool {
        true
    }
    fn is_caching_relevant(&self) -> bool {
        true
    }
    fn local_cache(&self) -> Arc<CacheAdapter> {
        Arc::clone(&self.local.lock())
    }
    fn replace_local_cache(&self, adapter: Arc<CacheAdapter>) {
        *self.local.lock() = adapter;
    }
    fn local_cache_attempt(&self) {}
    fn local_cache_hit(&self) {}
    fn set_cancel_policy(&self, policy: Arc<dyn QueryCancelPolicy>) {
        *self.policy.lock() = Some(policy);
    }
    fn cancel_policy(&self) -> Option<Arc<dyn QueryCancelPolicy>> {
        self.policy.lock().clone()
    }
}

struct TestExecutor {
    cache: Mutex<Option<std::sync::Weak<IterableCache>>>,
}

impl ReadonlyExecutor for TestExecutor {
    fn execute_in_readonly_txn(
        &self,
        body: &mut dyn FnMut(&dyn TxnContext) -> ironwood::Result<()>,
    ) -> ironwood::Result<()> {
        let cache = self
            .cache
            .lock()
            .clone()
            .and_then(|weak| weak.upgrade())
            .expect("executor wired to cache");
        let txn = TestTxn::new(cache.current_adapter());
        body(&txn)
    }
}

// ---------------------------------------------------------------------------
// The query under test: all user ids present in the index
// ---------------------------------------------------------------------------

struct AllUsersFingerprint {
    key: FingerprintKey,
}

impl QueryFingerprint for AllUsersFingerprint {
    fn key(&self) -> &FingerprintKey {
        &self.key
    }
    fn is_consistent(&self) -> bool {
        true
    }
    fn is_expired(&self) -> bool {
        false
    }
    fn birth_time(&self) -> u64 {
        0
    }
    fn reset_birth_time(&self) {}
    fn describe(&self) -> String {
        "all-users".to_owned()
    }
}

struct AllUsersIterable {
    tree: PatriciaTreeReader,
    fingerprint: Arc<AllUsersFingerprint>,
    scans: AtomicUsize,
}

impl CacheableIterable for AllUsersIterable {
    fn fingerprint(&self) -> Arc<dyn QueryFingerprint> {
        Arc::clone(&self.fingerprint) as Arc<dyn QueryFingerprint>
    }

    fn materialize(&self, txn: &dyn TxnContext) -> ironwood::Result<CachedIterable> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        let mut ids = Vec::new();
        for id in 1u8..=3 {
            if let Some(policy) = txn.cancel_policy() {
                policy.check()?;
            }
            let key = format!("user:{id}");
            if let Some(value) = self.tree.get(key.as_bytes())? {
                ids.push(u64::from(value[0]));
            }
        }
        Ok(CachedIterable::new(self.fingerprint(), ids))
    }
}

#[test]
fn tree_backed_query_is_cached_once() {
    let log = Arc::new(MemoryLog::new());
    let tree = build_user_index(&log);

    // The raw read path answers point lookups.
    assert_eq!(tree.get(b"user:2").unwrap(), Some(vec![2]));
    assert_eq!(tree.get(b"user:9").unwrap(), None);
    let root = tree.root().unwrap();
    assert_eq!(root.children_count(), 3);
    assert_eq!(root.key_suffix(), b"user:");

    let executor = Arc::new(TestExecutor {
        cache: Mutex::new(None),
    });
    let cache = IterableCache::new(
        StoreConfig::default(),
        Arc::clone(&executor) as Arc<dyn ReadonlyExecutor>,
    );
    *executor.cache.lock() = Some(Arc::downgrade(&cache));

    let iterable = Arc::new(AllUsersIterable {
        tree,
        fingerprint: Arc::new(AllUsersFingerprint {
            key: FingerprintKey::from_shape(b"all(kind=user)"),
        }),
        scans: AtomicUsize::new(0),
    });
    let as_dyn = Arc::clone(&iterable) as Arc<dyn CacheableIterable>;

    // First evaluation misses and schedules materialisation.
    let txn = TestTxn::new(cache.current_adapter());
    assert!(matches!(
        cache.put_if_not_cached(&as_dyn, &txn),
        CacheOutcome::Uncached
    ));
    assert!(cache.processor().wait_until_idle(Duration::from_secs(10)));
    assert_eq!(iterable.scans.load(Ordering::SeqCst), 1);

    // A transaction opened now sees the cached result without a scan.
    let txn = TestTxn::new(cache.current_adapter());
    match cache.put_if_not_cached(&as_dyn, &txn) {
        CacheOutcome::Cached(cached) => assert_eq!(cached.items(), &[1, 2, 3]),
        CacheOutcome::Uncached => panic!("expected a cache hit"),
    }
    assert_eq!(iterable.scans.load(Ordering::SeqCst), 1, "no re-scan on hit");

    // The counts path reuses the cached cardinality once set.
    cache.set_cached_count(&iterable.fingerprint.key, 3);
    assert_eq!(cache.get_cached_count(&iterable.fingerprint.key), Some(3));
    assert!(cache.hit_rate() > 0.0, "the hit above moved the estimator");
}
