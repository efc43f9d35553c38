//! Core types shared across the ironwood engine.
//!
//! The log is an append-only byte sequence addressed by 64-bit logical
//! offsets. Every persistent reference between trie nodes is an
//! [`Address`]; a single distinguished sentinel denotes "none". Loggable
//! records carry a one-byte [`NodeTag`] from which the Patricia read
//! path derives everything it needs to know about a node's shape.

mod config;
mod time;

use std::fmt;

pub use config::StoreConfig;
pub use time::{Clock, ManualClock, SystemClock};

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

/// A 64-bit logical offset into the append-only log.
///
/// Addresses are opaque to everything above the log: the trie stores
/// them, the log resolves them. [`Address::NULL`] is the distinguished
/// "no address" sentinel used by the synthetic empty-tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(u64);

impl Address {
    /// The "none" sentinel. Never resolves to a loggable.
    pub const NULL: Self = Self(u64::MAX);

    /// Create an address from a raw log offset.
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw log offset.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Whether this is the [`Address::NULL`] sentinel.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == Self::NULL.0
    }

    /// The address `offset` bytes past this one.
    #[inline]
    #[must_use]
    pub const fn offset_by(self, offset: u64) -> Self {
        Self(self.0 + offset)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("NULL")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<u64> for Address {
    fn from(raw: u64) -> Self {
        Self::new(raw)
    }
}

// ---------------------------------------------------------------------------
// Loggable type tags
// ---------------------------------------------------------------------------

/// A single-byte loggable type tag.
///
/// Bit layout (an implementation choice; the four predicates below are
/// the stable contract):
///
/// ```text
///   0 0 0 1 r c v ?      0x10  Patricia-node marker
///           │ │ └─────── 0x01  node stores a value
///           │ └───────── 0x02  node has children
///           └─────────── 0x04  node is the tree root
/// ```
///
/// Tag `0` is the null loggable backing the synthetic empty-tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeTag(u8);

impl NodeTag {
    const PATRICIA_BIT: u8 = 0x10;
    const HAS_VALUE_BIT: u8 = 0x01;
    const HAS_CHILDREN_BIT: u8 = 0x02;
    const ROOT_BIT: u8 = 0x04;

    /// The null loggable's tag.
    pub const NULL: Self = Self(0);

    /// Construct a Patricia-node tag from its shape predicates.
    #[must_use]
    pub const fn node(has_value: bool, has_children: bool, is_root: bool) -> Self {
        let mut tag = Self::PATRICIA_BIT;
        if has_value {
            tag |= Self::HAS_VALUE_BIT;
        }
        if has_children {
            tag |= Self::HAS_CHILDREN_BIT;
        }
        if is_root {
            tag |= Self::ROOT_BIT;
        }
        Self(tag)
    }

    /// Reconstruct a tag from its encoded byte.
    #[inline]
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// The encoded byte.
    #[inline]
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self.0
    }

    /// Whether the tagged loggable is a Patricia-trie node.
    #[inline]
    #[must_use]
    pub const fn is_patricia_node(self) -> bool {
        self.0 & Self::PATRICIA_BIT != 0
    }

    /// Whether the node stores a value.
    #[inline]
    #[must_use]
    pub const fn has_value(self) -> bool {
        self.0 & Self::HAS_VALUE_BIT != 0
    }

    /// Whether the node has a child table.
    #[inline]
    #[must_use]
    pub const fn has_children(self) -> bool {
        self.0 & Self::HAS_CHILDREN_BIT != 0
    }

    /// Whether the node is the tree root.
    #[inline]
    #[must_use]
    pub const fn is_root(self) -> bool {
        self.0 & Self::ROOT_BIT != 0
    }
}
