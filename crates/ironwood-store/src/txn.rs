//! Transaction-context seam consumed by the cache controller.
//!
//! The store's real transaction type lives above this crate; the cache
//! only needs the narrow surface below. A transaction's local cache is
//! the adapter generation it opened against, stable for the
//! transaction's lifetime except for local expiry evictions, which
//! replace the local `Arc` without touching the shared slot.

use std::sync::Arc;

use ironwood_error::Result;

use crate::adapter::CacheAdapter;
use crate::policy::QueryCancelPolicy;

/// The transaction surface the iterable cache reads and annotates.
pub trait TxnContext: Send + Sync {
    /// Whether the transaction can write. Mutable transactions never
    /// feed the cache: their view is not a published snapshot.
    fn is_mutable(&self) -> bool;

    /// Whether the transaction's snapshot is still the newest.
    fn is_current(&self) -> bool;

    /// Whether this transaction participates in caching at all
    /// (replays and exclusive maintenance transactions do not).
    fn is_caching_relevant(&self) -> bool;

    /// The adapter generation this transaction reads.
    fn local_cache(&self) -> Arc<CacheAdapter>;

    /// Replace the transaction's local view (expiry eviction).
    fn replace_local_cache(&self, adapter: Arc<CacheAdapter>);

    /// Telemetry hook: a cache lookup was attempted in this transaction.
    fn local_cache_attempt(&self);

    /// Telemetry hook: the lookup hit.
    fn local_cache_hit(&self);

    /// Install a cancellation policy for queries run in this
    /// transaction.
    fn set_cancel_policy(&self, policy: Arc<dyn QueryCancelPolicy>);

    /// The installed cancellation policy, if any. Materialisation polls
    /// this between units of work.
    fn cancel_policy(&self) -> Option<Arc<dyn QueryCancelPolicy>>;
}

/// Opens read-only transactions for background caching jobs.
pub trait ReadonlyExecutor: Send + Sync {
    /// Open a read-only transaction and run `body` inside it.
    fn execute_in_readonly_txn(
        &self,
        body: &mut dyn FnMut(&dyn TxnContext) -> Result<()>,
    ) -> Result<()>;
}
