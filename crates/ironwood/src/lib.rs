//! Public API facade for ironwood.
//!
//! Ironwood is an embedded transactional key/value engine: an
//! append-only log indexed by a Patricia trie, with an entity store and
//! a memoising iterable result cache layered on top. This crate
//! re-exports the pieces embedders wire together:
//!
//! - [`log`](ironwood_log): loggable records, byte cursors, and the
//!   `LogReader` seam over the append-only log.
//! - [`tree`](ironwood_tree): the zero-copy Patricia read path.
//! - [`store`](ironwood_store): the entity-iterable cache, cancellation
//!   policies, and the stuck-transaction monitor.
//! - [`exec`](ironwood_exec): the background worker pool and shared
//!   timer those layers run on.

pub use ironwood_error::{CancelReason, IronwoodError, Result};
pub use ironwood_log::{
    AddressedCursor, ByteCursor, BytesWithAddress, LogReader, Loggable, MemoryLog,
    read_compressed_u64, write_compressed_u64,
};
pub use ironwood_store::{
    CacheAdapter, CacheOutcome, CacheStatisticsSnapshot, CacheableIterable, CachedIterable,
    DeferredAdmission, EntityId, FingerprintKey, IterableCache, MonitoredTxn, QueryCancelPolicy,
    QueryFingerprint, ReadonlyExecutor, StuckTxnMonitor, TxnContext, TxnRegistry,
};
pub use ironwood_tree::{ChildReference, ImmutableNode, NodeImage, PatriciaTreeReader};
pub use ironwood_types::{Address, Clock, ManualClock, NodeTag, StoreConfig, SystemClock};

pub use ironwood_exec as exec;
pub use ironwood_log as log;
pub use ironwood_store as store;
pub use ironwood_tree as tree;
pub use ironwood_types as types;
