//! Query fingerprints and cached iterables.

use std::fmt;
use std::sync::Arc;

use ironwood_error::Result;
use xxhash_rust::xxh3::xxh3_64;

use crate::txn::TxnContext;

/// Entity identifier. The full entity-attribute model lives above this
/// crate; the cache only needs a stable id per result element.
pub type EntityId = u64;

// ---------------------------------------------------------------------------
// FingerprintKey
// ---------------------------------------------------------------------------

/// Equality- and hash-bearing identity of a query fingerprint.
///
/// Built from the query's structural shape (operator tree and
/// parameters, serialised by the query layer). Two iterables with equal
/// keys produce equal results against the same logical database state.
#[derive(Clone)]
pub struct FingerprintKey {
    hash: u64,
    shape: Arc<[u8]>,
}

impl FingerprintKey {
    /// Build a key from the serialised structural shape.
    #[must_use]
    pub fn from_shape(shape: &[u8]) -> Self {
        Self {
            hash: xxh3_64(shape),
            shape: Arc::from(shape),
        }
    }

    /// The precomputed shape hash.
    #[inline]
    #[must_use]
    pub const fn hash(&self) -> u64 {
        self.hash
    }
}

impl PartialEq for FingerprintKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.shape == other.shape
    }
}

impl Eq for FingerprintKey {}

impl std::hash::Hash for FingerprintKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl fmt::Debug for FingerprintKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FingerprintKey({:016x})", self.hash)
    }
}

// ---------------------------------------------------------------------------
// QueryFingerprint
// ---------------------------------------------------------------------------

/// The cache key contract an iterable's fingerprint provides.
pub trait QueryFingerprint: Send + Sync + 'static {
    /// Identity used for cache lookup and job coalescing.
    fn key(&self) -> &FingerprintKey;

    /// Whether a background computation is guaranteed to yield the same
    /// bytes as a synchronous execution against the same snapshot.
    fn is_consistent(&self) -> bool;

    /// Whether the snapshot this fingerprint was built against has been
    /// superseded. Expired entries are evicted on lookup.
    fn is_expired(&self) -> bool;

    /// Birth timestamp in epoch milliseconds.
    fn birth_time(&self) -> u64;

    /// Reset the birth timestamp; called when an inconsistent job is
    /// re-materialised to keep the entry alive.
    fn reset_birth_time(&self);

    /// Human-readable rendering for telemetry log lines.
    fn describe(&self) -> String {
        format!("fingerprint#{:016x}", self.key().hash())
    }
}

// ---------------------------------------------------------------------------
// CacheableIterable
// ---------------------------------------------------------------------------

/// A query result the cache controller can memoise.
///
/// Implemented by the query layer. `materialize` runs the query to
/// completion inside `txn` and must poll the transaction's installed
/// cancellation policy between units of work, so background jobs can
/// stop when their adapter generation is superseded or their budget is
/// spent.
pub trait CacheableIterable: Send + Sync + 'static {
    /// The iterable's structural fingerprint.
    fn fingerprint(&self) -> Arc<dyn QueryFingerprint>;

    /// Whether this iterable may be cached at all.
    fn can_be_cached(&self) -> bool {
        true
    }

    /// Whether `materialize` may run on a thread other than the
    /// caller's. Gates asynchronous counts jobs.
    fn is_thread_safe(&self) -> bool {
        true
    }

    /// Run the query and produce the materialised result.
    fn materialize(&self, txn: &dyn TxnContext) -> Result<CachedIterable>;
}

// ---------------------------------------------------------------------------
// CachedIterable
// ---------------------------------------------------------------------------

/// A materialised query result plus its fingerprint.
///
/// Holds no references into transactions or the log; expiry is carried
/// by the fingerprint.
#[derive(Clone)]
pub struct CachedIterable {
    fingerprint: Arc<dyn QueryFingerprint>,
    items: Arc<[EntityId]>,
}

impl CachedIterable {
    /// Wrap a materialised result.
    #[must_use]
    pub fn new(fingerprint: Arc<dyn QueryFingerprint>, items: Vec<EntityId>) -> Self {
        Self {
            fingerprint,
            items: items.into(),
        }
    }

    /// The fingerprint this result was computed for.
    #[must_use]
    pub fn fingerprint(&self) -> &Arc<dyn QueryFingerprint> {
        &self.fingerprint
    }

    /// The result elements.
    #[must_use]
    pub fn items(&self) -> &[EntityId] {
        &self.items
    }

    /// Result cardinality.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the result is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether the underlying snapshot has been superseded.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.fingerprint.is_expired()
    }
}

impl fmt::Debug for CachedIterable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedIterable")
            .field("fingerprint", &self.fingerprint.key())
            .field("len", &self.items.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_equality_and_hash() {
        let a = FingerprintKey::from_shape(b"intersect(links(7), sorted(kind=3))");
        let b = FingerprintKey::from_shape(b"intersect(links(7), sorted(kind=3))");
        let c = FingerprintKey::from_shape(b"union(links(7), sorted(kind=3))");
        assert_eq!(a, b);
        assert_eq!(a.hash(), b.hash());
        assert_ne!(a, c);
    }

    #[test]
    fn key_debug_is_terse() {
        let key = FingerprintKey::from_shape(b"all(kind=1)");
        assert!(format!("{key:?}").starts_with("FingerprintKey("));
    }
}
