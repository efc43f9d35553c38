//! Error types for the ironwood storage engine.
//!
//! One structured enum covers the whole engine: the log read path, the
//! Patricia-trie view, and the iterable-cache orchestration. Variants
//! carry enough context to be actionable in logs without holding
//! references into the log itself.

use std::fmt;

use thiserror::Error;

/// Why a caching job cancelled itself.
///
/// Carried inside [`IronwoodError::TooLongInstantiation`] and rendered in
/// the orchestrator's info-level log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The cache adapter generation the job captured was replaced while
    /// the job was materialising a consistent result.
    CacheAdapterObsolete,
    /// The job exceeded its wall-clock budget.
    JobOverdue,
}

impl CancelReason {
    /// Human-readable form used in log lines.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::CacheAdapterObsolete => "cache adapter is obsolete",
            Self::JobOverdue => "caching job is overdue",
        }
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Primary error type for ironwood operations.
#[derive(Error, Debug)]
pub enum IronwoodError {
    // === Log read path ===
    /// A byte cursor ran past the end of its loggable payload.
    #[error("unexpected end of input in log stream")]
    EndOfInput,

    /// A compressed unsigned long did not terminate within the maximum
    /// encoded length, or set bits above bit 63.
    #[error("compressed unsigned long overflows 64 bits")]
    VarintOverflow,

    /// The input ended in the middle of a compressed unsigned long.
    #[error("truncated compressed unsigned long")]
    VarintTruncated,

    // === Patricia format ===
    /// A node header carried a child-address width outside `[1, 8]`.
    /// Indicates log corruption; the store must refuse further reads.
    #[error("invalid child address length: {len}")]
    InvalidAddressLength { len: u64 },

    /// An address does not resolve to the expected loggable.
    #[error("invalid address {address:#x}: {detail}")]
    InvalidAddress { address: u64, detail: &'static str },

    /// A mutating operation was invoked on an immutable view. Always a
    /// programmer error; the write path goes through the mutable tree.
    #[error("unsupported operation: {operation}")]
    NotSupported { operation: &'static str },

    // === Cache orchestration ===
    /// A caching job cancelled itself; see [`CancelReason`].
    #[error("iterable instantiation took too long: {reason}")]
    TooLongInstantiation { reason: CancelReason },

    /// A caching job hit a write attempt inside its read-only
    /// transaction. Re-queued once at lower priority, never surfaced.
    #[error("write attempted in a read-only transaction")]
    ReadonlyConflict,

    /// A link referent was deleted concurrently with iteration.
    #[error("phantom link: referent was deleted concurrently")]
    PhantomLink,

    // === Ambient ===
    /// File I/O error from the underlying log device.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IronwoodError {
    /// Format errors that indicate log corruption or a broken read path.
    /// These bubble up; the store refuses further reads after one.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::EndOfInput
                | Self::VarintOverflow
                | Self::VarintTruncated
                | Self::InvalidAddressLength { .. }
                | Self::InvalidAddress { .. }
                | Self::Io(_)
        )
    }

    /// Errors the caching orchestrator absorbs without surfacing to the
    /// query-evaluation path.
    #[must_use]
    pub const fn is_caching_internal(&self) -> bool {
        matches!(
            self,
            Self::TooLongInstantiation { .. } | Self::ReadonlyConflict
        )
    }

    /// Create a cancellation error for the given reason.
    #[must_use]
    pub const fn cancelled(reason: CancelReason) -> Self {
        Self::TooLongInstantiation { reason }
    }

    /// Create a not-supported error for the named operation.
    #[must_use]
    pub const fn not_supported(operation: &'static str) -> Self {
        Self::NotSupported { operation }
    }
}

/// Result type alias using [`IronwoodError`].
pub type Result<T> = std::result::Result<T, IronwoodError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = IronwoodError::InvalidAddressLength { len: 9 };
        assert_eq!(err.to_string(), "invalid child address length: 9");

        let err = IronwoodError::InvalidAddress {
            address: 0x1000,
            detail: "not a Patricia node",
        };
        assert_eq!(
            err.to_string(),
            "invalid address 0x1000: not a Patricia node"
        );
    }

    #[test]
    fn cancel_reason_messages() {
        assert_eq!(
            IronwoodError::cancelled(CancelReason::CacheAdapterObsolete).to_string(),
            "iterable instantiation took too long: cache adapter is obsolete"
        );
        assert_eq!(
            IronwoodError::cancelled(CancelReason::JobOverdue).to_string(),
            "iterable instantiation took too long: caching job is overdue"
        );
    }

    #[test]
    fn fatal_classification() {
        assert!(IronwoodError::EndOfInput.is_fatal());
        assert!(IronwoodError::InvalidAddressLength { len: 0 }.is_fatal());
        assert!(!IronwoodError::ReadonlyConflict.is_fatal());
        assert!(!IronwoodError::not_supported("remove").is_fatal());
    }

    #[test]
    fn caching_internal_classification() {
        assert!(IronwoodError::ReadonlyConflict.is_caching_internal());
        assert!(
            IronwoodError::cancelled(CancelReason::JobOverdue).is_caching_internal()
        );
        assert!(!IronwoodError::PhantomLink.is_caching_internal());
    }

    #[test]
    fn io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short page");
        let err: IronwoodError = io_err.into();
        assert!(matches!(err, IronwoodError::Io(_)));
        assert!(err.is_fatal());
    }
}
