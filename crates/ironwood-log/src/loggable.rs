//! Loggable records and the log accessor seam.

use ironwood_error::Result;
use ironwood_types::{Address, NodeTag};

use crate::cursor::BytesWithAddress;

/// A typed record read out of the append-only log.
///
/// `address` points at the record's tag byte; the payload view is
/// anchored one byte past it (the data address). The record pins its
/// backing page through the payload view.
#[derive(Debug, Clone)]
pub struct Loggable {
    address: Address,
    tag: NodeTag,
    data: BytesWithAddress,
}

impl Loggable {
    /// Assemble a loggable from its parts.
    #[must_use]
    pub fn new(address: Address, tag: NodeTag, data: BytesWithAddress) -> Self {
        Self { address, tag, data }
    }

    /// The null loggable backing the synthetic empty-tree node.
    #[must_use]
    pub fn null() -> Self {
        Self {
            address: Address::NULL,
            tag: NodeTag::NULL,
            data: BytesWithAddress::empty(),
        }
    }

    /// The record's log address.
    #[inline]
    #[must_use]
    pub const fn address(&self) -> Address {
        self.address
    }

    /// The record's type tag.
    #[inline]
    #[must_use]
    pub const fn tag(&self) -> NodeTag {
        self.tag
    }

    /// The payload view.
    #[inline]
    #[must_use]
    pub const fn data(&self) -> &BytesWithAddress {
        &self.data
    }

    /// The logical address the payload starts at.
    #[inline]
    #[must_use]
    pub const fn data_address(&self) -> Address {
        self.data.data_address()
    }

    /// Whether this is the null loggable.
    #[inline]
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.address.is_null()
    }
}

/// The log page accessor the read path consumes.
///
/// Implementations must return payload views that stay stable for as
/// long as the caller holds them; the `Arc`-backed [`BytesWithAddress`]
/// makes that automatic for in-memory implementations, and a paged
/// implementation satisfies it by pinning the page into the view.
pub trait LogReader: Send + Sync {
    /// Resolve the loggable whose record starts at `address`.
    ///
    /// Fails with `InvalidAddress` if no record starts there.
    fn loggable_at(&self, address: Address) -> Result<Loggable>;
}
