//! Byte views and cursors over loggable payloads.
//!
//! [`BytesWithAddress`] is the random-access view: a contiguous byte
//! range that knows its own logical address and is backed by an
//! `Arc<[u8]>`, so the refcount realises the page-pinning guarantee
//! and a node view keeps its log page alive simply by existing.
//! [`AddressedCursor`] is the forward-only pull reader layered on top.

use std::sync::Arc;

use ironwood_error::{IronwoodError, Result};
use ironwood_types::Address;

// ---------------------------------------------------------------------------
// ByteCursor
// ---------------------------------------------------------------------------

/// A forward-only reader positioned at a logical address.
pub trait ByteCursor {
    /// Whether at least one more byte remains.
    fn has_next(&self) -> bool;

    /// Read one byte and advance.
    fn next(&mut self) -> Result<u8>;

    /// Skip up to `length` bytes, returning how many were skipped.
    ///
    /// The result is undefined for `length == 0`; returns 0 once the
    /// cursor is exhausted.
    fn skip(&mut self, length: u64) -> u64;

    /// Decode `len` bytes big-endian into an unsigned 64-bit value and
    /// advance past them. `len` must be in `[0, 8]`; the caller
    /// guarantees that many bytes remain.
    fn next_unsigned(&mut self, len: usize) -> Result<u64>;

    /// The logical address of the next byte to be read.
    fn address(&self) -> Address;
}

// ---------------------------------------------------------------------------
// BytesWithAddress
// ---------------------------------------------------------------------------

/// A shared read-only byte range anchored at a logical log address.
///
/// Cloning is cheap (one refcount bump) and every clone pins the same
/// backing allocation. All offsets are relative to the view's data
/// address.
#[derive(Debug, Clone)]
pub struct BytesWithAddress {
    bytes: Arc<[u8]>,
    start: usize,
    len: usize,
    data_address: Address,
}

impl BytesWithAddress {
    /// Wrap a byte range `[start, start + len)` of `bytes`, anchored at
    /// `data_address`.
    #[must_use]
    pub fn new(bytes: Arc<[u8]>, start: usize, len: usize, data_address: Address) -> Self {
        debug_assert!(start + len <= bytes.len(), "view must lie within backing bytes");
        Self {
            bytes,
            start,
            len,
            data_address,
        }
    }

    /// The empty view at the null address, backing the empty-tree node.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            bytes: Arc::from(&[][..]),
            start: 0,
            len: 0,
            data_address: Address::NULL,
        }
    }

    /// The logical address of offset 0 of this view.
    #[inline]
    #[must_use]
    pub const fn data_address(&self) -> Address {
        self.data_address
    }

    /// Length of the view in bytes.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the view is empty.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The byte at `offset`. The caller guarantees `offset < len()`.
    #[inline]
    #[must_use]
    pub fn byte_at(&self, offset: usize) -> u8 {
        self.bytes[self.start + offset]
    }

    /// The view's bytes as a slice.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[self.start..self.start + self.len]
    }

    /// A sub-slice `[offset, offset + len)` of the view.
    #[inline]
    #[must_use]
    pub fn slice(&self, offset: usize, len: usize) -> &[u8] {
        &self.as_slice()[offset..offset + len]
    }

    /// Decode `len` bytes big-endian starting at `offset` without
    /// constructing a cursor. `len` must be in `[0, 8]` and the range
    /// must lie within the view.
    #[must_use]
    pub fn next_unsigned_at(&self, offset: usize, len: usize) -> u64 {
        debug_assert!(len <= 8, "fixed-width reads are at most 8 bytes");
        let mut result = 0u64;
        for &byte in self.slice(offset, len) {
            result = (result << 8) | u64::from(byte);
        }
        result
    }

    /// A cursor positioned at offset 0.
    #[must_use]
    pub fn cursor(&self) -> AddressedCursor<'_> {
        self.cursor_at(0)
    }

    /// A cursor positioned at an absolute offset within the view.
    ///
    /// An offset at or past the end yields an exhausted cursor.
    #[must_use]
    pub fn cursor_at(&self, offset: usize) -> AddressedCursor<'_> {
        AddressedCursor {
            data: self,
            pos: offset.min(self.len),
        }
    }
}

// ---------------------------------------------------------------------------
// AddressedCursor
// ---------------------------------------------------------------------------

/// Forward-only cursor over a [`BytesWithAddress`] view.
#[derive(Debug, Clone)]
pub struct AddressedCursor<'a> {
    data: &'a BytesWithAddress,
    pos: usize,
}

impl AddressedCursor<'_> {
    /// Offset of the next byte relative to the view's data address.
    #[inline]
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.pos
    }
}

impl ByteCursor for AddressedCursor<'_> {
    #[inline]
    fn has_next(&self) -> bool {
        self.pos < self.data.len()
    }

    #[inline]
    fn next(&mut self) -> Result<u8> {
        if self.pos >= self.data.len() {
            return Err(IronwoodError::EndOfInput);
        }
        let byte = self.data.byte_at(self.pos);
        self.pos += 1;
        Ok(byte)
    }

    fn skip(&mut self, length: u64) -> u64 {
        let remaining = (self.data.len() - self.pos) as u64;
        let skipped = remaining.min(length);
        self.pos += usize::try_from(skipped).unwrap_or(usize::MAX);
        skipped
    }

    fn next_unsigned(&mut self, len: usize) -> Result<u64> {
        debug_assert!(len <= 8, "fixed-width reads are at most 8 bytes");
        if self.data.len() - self.pos < len {
            return Err(IronwoodError::EndOfInput);
        }
        let mut result = 0u64;
        for _ in 0..len {
            result = (result << 8) | u64::from(self.data.byte_at(self.pos));
            self.pos += 1;
        }
        Ok(result)
    }

    #[inline]
    fn address(&self) -> Address {
        self.data.data_address().offset_by(self.pos as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(bytes: &[u8], address: u64) -> BytesWithAddress {
        BytesWithAddress::new(Arc::from(bytes), 0, bytes.len(), Address::new(address))
    }

    #[test]
    fn next_and_exhaustion() {
        let data = view(&[0xAB, 0xCD], 100);
        let mut cursor = data.cursor();
        assert!(cursor.has_next());
        assert_eq!(cursor.next().unwrap(), 0xAB);
        assert_eq!(cursor.next().unwrap(), 0xCD);
        assert!(!cursor.has_next());
        assert!(matches!(cursor.next(), Err(IronwoodError::EndOfInput)));
    }

    #[test]
    fn cursor_tracks_address() {
        let data = view(&[1, 2, 3, 4], 1000);
        let mut cursor = data.cursor_at(1);
        assert_eq!(cursor.address(), Address::new(1001));
        cursor.next().unwrap();
        assert_eq!(cursor.address(), Address::new(1002));
    }

    #[test]
    fn skip_clamps_to_remaining() {
        let data = view(&[0; 5], 0);
        let mut cursor = data.cursor();
        assert_eq!(cursor.skip(3), 3);
        assert_eq!(cursor.skip(10), 2);
        assert_eq!(cursor.skip(1), 0);
        assert!(!cursor.has_next());
    }

    #[test]
    fn next_unsigned_big_endian() {
        let data = view(&[0x01, 0x02, 0x03, 0x04], 0);
        let mut cursor = data.cursor();
        assert_eq!(cursor.next_unsigned(2).unwrap(), 0x0102);
        assert_eq!(cursor.next_unsigned(2).unwrap(), 0x0304);

        let mut cursor = data.cursor();
        assert_eq!(cursor.next_unsigned(0).unwrap(), 0);
        assert_eq!(cursor.next_unsigned(4).unwrap(), 0x0102_0304);
    }

    #[test]
    fn next_unsigned_underflow() {
        let data = view(&[0x01], 0);
        let mut cursor = data.cursor();
        assert!(matches!(
            cursor.next_unsigned(2),
            Err(IronwoodError::EndOfInput)
        ));
    }

    #[test]
    fn random_access_reads() {
        let data = view(&[9, 8, 7, 6, 5], 50);
        assert_eq!(data.byte_at(2), 7);
        assert_eq!(data.next_unsigned_at(1, 2), 0x0807);
        assert_eq!(data.slice(3, 2), &[6, 5]);
    }

    #[test]
    fn empty_view() {
        let data = BytesWithAddress::empty();
        assert!(data.is_empty());
        assert!(data.data_address().is_null());
        assert!(!data.cursor().has_next());
    }

    #[test]
    fn sub_view_offsets_are_relative() {
        let backing: Arc<[u8]> = Arc::from(&[0u8, 1, 2, 3, 4, 5][..]);
        let data = BytesWithAddress::new(backing, 2, 3, Address::new(200));
        assert_eq!(data.len(), 3);
        assert_eq!(data.byte_at(0), 2);
        assert_eq!(data.as_slice(), &[2, 3, 4]);
        assert_eq!(data.cursor().address(), Address::new(200));
    }
}
