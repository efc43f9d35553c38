//! Immutable Patricia node view.
//!
//! A node is parsed once on construction: the cursor is walked past the
//! key suffix and the optional value, the children header is decoded,
//! and `data_offset` records where the child table begins. Everything
//! after that (child lookup, range positioning, iteration) reads the
//! encoded child table directly.
//!
//! On-disk layout, after the one-byte type tag:
//!
//! ```text
//! ┌──────────────┬───────────┬───────────────┬────────────┬──────────────────────────┐
//! │ suffix len   │ suffix    │ value len     │ value      │ children header + table  │
//! │ (compressed) │ bytes     │ (compressed,  │ bytes      │ (see below)              │
//! │              │           │  if hasValue) │            │                          │
//! └──────────────┴───────────┴───────────────┴────────────┴──────────────────────────┘
//! ```
//!
//! The children header is one compressed unsigned long holding
//! `(childrenCount << 3) | (childAddressLength - 1)`. The table is
//! `childrenCount` entries of `1 + childAddressLength` bytes each: the
//! child's discriminating key byte, then its address big-endian. Entries
//! are sorted strictly ascending by key byte, which is what makes the
//! binary searches below valid.

use ironwood_error::{IronwoodError, Result};
use ironwood_log::{AddressedCursor, ByteCursor, BytesWithAddress, Loggable, read_compressed_u64};
use ironwood_types::Address;

use crate::reader::PatriciaTreeReader;

/// Validate a decoded child-address width.
///
/// Widths outside `[1, 8]` cannot come from a well-formed header and
/// indicate log corruption.
pub fn check_address_length(len: u64) -> Result<()> {
    if len == 0 || len > 8 {
        return Err(IronwoodError::InvalidAddressLength { len });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// ChildReference
// ---------------------------------------------------------------------------

/// One entry of a node's child table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildReference {
    /// The child's discriminating key byte.
    pub first_byte: u8,
    /// Log address of the child node.
    pub suffix_address: Address,
}

// ---------------------------------------------------------------------------
// ImmutableNode
// ---------------------------------------------------------------------------

/// Zero-copy view of a Patricia node inside its log record.
///
/// The view pins its log page through the loggable's payload; it is
/// read-only and freely shareable across readers.
#[derive(Debug, Clone)]
pub struct ImmutableNode {
    loggable: Loggable,
    key_suffix_start: usize,
    key_suffix_len: usize,
    value_start: usize,
    value_len: usize,
    children_count: u16,
    child_address_length: u8,
    /// Byte offset from the data address at which the child table begins.
    data_offset: usize,
}

impl ImmutableNode {
    /// Parse a node view out of a Patricia-node loggable.
    pub fn from_loggable(loggable: Loggable) -> Result<Self> {
        let tag = loggable.tag();
        let data = loggable.data().clone();
        let mut cursor = data.cursor();

        let key_suffix_len = read_compressed_u64(&mut cursor)? as usize;
        let key_suffix_start = cursor.offset();
        if cursor.skip(key_suffix_len as u64) < key_suffix_len as u64 {
            return Err(IronwoodError::EndOfInput);
        }

        let (value_start, value_len) = if tag.has_value() {
            let len = read_compressed_u64(&mut cursor)? as usize;
            let start = cursor.offset();
            if cursor.skip(len as u64) < len as u64 {
                return Err(IronwoodError::EndOfInput);
            }
            (start, len)
        } else {
            (0, 0)
        };

        let (children_count, child_address_length) = if tag.has_children() {
            let header = read_compressed_u64(&mut cursor)?;
            let count = header >> 3;
            let width = (header & 7) + 1;
            check_address_length(width)?;
            let count = u16::try_from(count).map_err(|_| IronwoodError::InvalidAddress {
                address: loggable.address().raw(),
                detail: "children count exceeds 16 bits",
            })?;
            (count, width as u8)
        } else {
            (0, 0)
        };

        let data_offset = cursor.offset();
        if tag.has_children() {
            let table_len =
                usize::from(children_count) * (usize::from(child_address_length) + 1);
            if data.len() - data_offset < table_len {
                return Err(IronwoodError::InvalidAddress {
                    address: loggable.address().raw(),
                    detail: "child table is truncated",
                });
            }
        }

        Ok(Self {
            loggable,
            key_suffix_start,
            key_suffix_len,
            value_start,
            value_len,
            children_count,
            child_address_length,
            data_offset,
        })
    }

    /// The synthetic node representing an empty tree: null address, no
    /// key suffix, no children. All lookups and iterators short-circuit.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            loggable: Loggable::null(),
            key_suffix_start: 0,
            key_suffix_len: 0,
            value_start: 0,
            value_len: 0,
            children_count: 0,
            child_address_length: 0,
            data_offset: 0,
        }
    }

    /// Log address of this node.
    #[inline]
    #[must_use]
    pub const fn address(&self) -> Address {
        self.loggable.address()
    }

    /// Whether this node is the tree root.
    #[inline]
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.loggable.tag().is_root()
    }

    /// The compressed edge label from the parent.
    #[must_use]
    pub fn key_suffix(&self) -> &[u8] {
        self.loggable
            .data()
            .slice(self.key_suffix_start, self.key_suffix_len)
    }

    /// The node's value, if it stores one. A present-but-empty value is
    /// `Some(&[])`, distinct from `None`.
    #[must_use]
    pub fn value(&self) -> Option<&[u8]> {
        if self.loggable.tag().has_value() {
            Some(self.loggable.data().slice(self.value_start, self.value_len))
        } else {
            None
        }
    }

    /// Number of children; 0 if none.
    #[inline]
    #[must_use]
    pub const fn children_count(&self) -> u16 {
        self.children_count
    }

    /// Per-node fixed width of encoded child addresses.
    #[inline]
    #[must_use]
    pub const fn child_address_length(&self) -> u8 {
        self.child_address_length
    }

    #[inline]
    const fn entry_len(&self) -> usize {
        self.child_address_length as usize + 1
    }

    #[inline]
    const fn data(&self) -> &BytesWithAddress {
        self.loggable.data()
    }

    /// Cursor into the child table, `offset` bytes past its start.
    fn table_cursor(&self, offset: usize) -> AddressedCursor<'_> {
        self.data().cursor_at(self.data_offset + offset)
    }

    /// Binary search the child table for key byte `b`, returning the
    /// entry index on a hit.
    fn search_child(&self, b: u8) -> Option<usize> {
        let key = i32::from(b);
        let mut low = 0i32;
        let mut high = i32::from(self.children_count) - 1;
        while low <= high {
            let mid = (low + high) >> 1;
            let offset = self.data_offset + mid as usize * self.entry_len();
            let cmp = i32::from(self.data().byte_at(offset)) - key;
            if cmp < 0 {
                low = mid + 1;
            } else if cmp > 0 {
                high = mid - 1;
            } else {
                return Some(mid as usize);
            }
        }
        None
    }

    /// Decode the child entry at `index`.
    fn child_at(&self, index: usize) -> ChildReference {
        let offset = self.data_offset + index * self.entry_len();
        let first_byte = self.data().byte_at(offset);
        let suffix_address = self
            .data()
            .next_unsigned_at(offset + 1, self.child_address_length as usize);
        ChildReference {
            first_byte,
            suffix_address: Address::new(suffix_address),
        }
    }

    /// Look up the child with key byte `b` and load it through the tree
    /// façade. `None` on a miss.
    pub fn get_child(
        &self,
        tree: &PatriciaTreeReader,
        b: u8,
    ) -> Result<Option<ImmutableNode>> {
        match self.search_child(b) {
            Some(index) => {
                let child = self.child_at(index);
                tree.load_node(child.suffix_address).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Forward iterator over all children, starting before the first.
    #[must_use]
    pub fn children(&self) -> ChildrenIterator<'_> {
        ChildrenIterator {
            node: self,
            cursor: Some(self.table_cursor(0)),
            index: -1,
            current: None,
            empty: false,
        }
    }

    /// Iterator positioned at the child whose key byte equals `b`, or an
    /// empty iterator if absent. On a hit the iterator's current entry
    /// is the match and `next()` continues after it.
    #[must_use]
    pub fn children_from(&self, b: u8) -> ChildrenIterator<'_> {
        match self.search_child(b) {
            Some(index) => {
                let current = self.child_at(index);
                ChildrenIterator {
                    node: self,
                    cursor: Some(self.table_cursor((index + 1) * self.entry_len())),
                    index: index as isize,
                    current: Some(current),
                    empty: false,
                }
            }
            None => self.empty_iterator(),
        }
    }

    /// Iterator positioned at the first child whose key byte is strictly
    /// greater than `b`; empty if none exists.
    #[must_use]
    pub fn children_range(&self, b: u8) -> ChildrenIterator<'_> {
        let key = i32::from(b);
        let mut low = -1i32;
        let mut high = i32::from(self.children_count);
        let mut result = -1i32;
        while high - low > 1 {
            let mid = (low + high + 1) >> 1;
            let offset = self.data_offset + mid as usize * self.entry_len();
            if i32::from(self.data().byte_at(offset)) > key {
                result = mid;
                high = mid;
            } else {
                low = mid;
            }
        }
        if result >= 0 {
            let current = self.child_at(result as usize);
            ChildrenIterator {
                node: self,
                cursor: Some(self.table_cursor((result as usize + 1) * self.entry_len())),
                index: result as isize,
                current: Some(current),
                empty: false,
            }
        } else {
            self.empty_iterator()
        }
    }

    /// Iterator positioned one past the last child, so the first `prev()`
    /// yields the last entry.
    #[must_use]
    pub fn children_last(&self) -> ChildrenIterator<'_> {
        ChildrenIterator {
            node: self,
            cursor: None,
            index: self.children_count as isize,
            current: None,
            empty: false,
        }
    }

    fn empty_iterator(&self) -> ChildrenIterator<'_> {
        ChildrenIterator {
            node: self,
            cursor: None,
            index: -1,
            current: None,
            empty: true,
        }
    }
}

// ---------------------------------------------------------------------------
// ChildrenIterator
// ---------------------------------------------------------------------------

/// Bidirectional streaming iterator over a node's child table.
///
/// Forward steps stream off one cursor; a backward step re-seeks a fresh
/// cursor at the target entry, so backward iteration pays one seek per
/// step. The iterator borrows its parent node, which therefore outlives
/// it.
#[derive(Debug)]
pub struct ChildrenIterator<'a> {
    node: &'a ImmutableNode,
    cursor: Option<AddressedCursor<'a>>,
    /// Index of the current entry; -1 before the first, `children_count`
    /// past the last.
    index: isize,
    current: Option<ChildReference>,
    /// A failed positioned lookup yields an iterator that is empty in
    /// both directions regardless of the node's child count.
    empty: bool,
}

impl<'a> ChildrenIterator<'a> {
    /// Whether a forward step is possible.
    #[must_use]
    pub fn has_next(&self) -> bool {
        !self.empty && self.index < self.node.children_count as isize - 1
    }

    /// Whether a backward step is possible.
    #[must_use]
    pub fn has_prev(&self) -> bool {
        !self.empty && self.index > 0
    }

    /// Advance and return the next child entry.
    pub fn next(&mut self) -> Result<ChildReference> {
        if !self.has_next() {
            return Err(IronwoodError::EndOfInput);
        }
        self.index += 1;
        let entry = self.read_entry()?;
        self.current = Some(entry);
        Ok(entry)
    }

    /// Step backward and return the previous child entry.
    ///
    /// Re-seeks a fresh cursor at the target entry: iteration is
    /// unidirectionally streaming and a backward step pays a seek.
    pub fn prev(&mut self) -> Result<ChildReference> {
        if !self.has_prev() {
            return Err(IronwoodError::EndOfInput);
        }
        self.index -= 1;
        self.reseek();
        let entry = self.read_entry()?;
        self.current = Some(entry);
        Ok(entry)
    }

    /// Advance like [`ChildrenIterator::next`], reusing the current
    /// entry slot. The reference returned by the previous step is
    /// invalidated; the borrow checker enforces what the contract asks
    /// of callers.
    pub fn next_in_place(&mut self) -> Result<&ChildReference> {
        if !self.has_next() {
            return Err(IronwoodError::EndOfInput);
        }
        self.index += 1;
        let entry = self.read_entry()?;
        self.current = Some(entry);
        Ok(self.current.as_ref().expect("just set"))
    }

    /// Step backward like [`ChildrenIterator::prev`], reusing the
    /// current entry slot.
    pub fn prev_in_place(&mut self) -> Result<&ChildReference> {
        if !self.has_prev() {
            return Err(IronwoodError::EndOfInput);
        }
        self.index -= 1;
        self.reseek();
        let entry = self.read_entry()?;
        self.current = Some(entry);
        Ok(self.current.as_ref().expect("just set"))
    }

    /// The entry the iterator is positioned at, if any.
    #[must_use]
    pub const fn current(&self) -> Option<&ChildReference> {
        self.current.as_ref()
    }

    /// Index of the current entry.
    #[must_use]
    pub const fn index(&self) -> isize {
        self.index
    }

    /// The node this iterator walks. Callers that descend and come back
    /// use this to re-anchor.
    #[must_use]
    pub const fn node(&self) -> &'a ImmutableNode {
        self.node
    }

    /// Removal never works on the immutable view; deletion goes through
    /// the store's write path.
    pub fn remove(&mut self) -> Result<()> {
        Err(IronwoodError::not_supported(
            "removing a child of an immutable Patricia node",
        ))
    }

    fn reseek(&mut self) {
        let offset = self.index as usize * self.node.entry_len();
        self.cursor = Some(self.node.table_cursor(offset));
    }

    fn read_entry(&mut self) -> Result<ChildReference> {
        let width = self.node.child_address_length as usize;
        let cursor = self.cursor.as_mut().ok_or(IronwoodError::EndOfInput)?;
        let first_byte = cursor.next()?;
        let suffix_address = cursor.next_unsigned(width)?;
        Ok(ChildReference {
            first_byte,
            suffix_address: Address::new(suffix_address),
        })
    }
}
