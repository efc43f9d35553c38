//! Node image encoding.
//!
//! Serialises a single node into the on-disk layout the read path
//! parses. This is not the trie write path (no splits, no rebalancing,
//! no parent fixups); it exists for bulk loading and test fixtures,
//! where node shapes are decided by the caller.

use ironwood_error::{IronwoodError, Result};
use ironwood_log::{MemoryLog, write_compressed_u64};
use ironwood_types::{Address, NodeTag};

use crate::node::check_address_length;

/// A node shape to be encoded.
#[derive(Debug, Clone)]
pub struct NodeImage<'a> {
    /// Compressed edge label from the parent.
    pub key_suffix: &'a [u8],
    /// Stored value; `Some(&[])` encodes a present, empty value.
    pub value: Option<&'a [u8]>,
    /// Child table entries, strictly ascending by key byte.
    pub children: &'a [(u8, Address)],
    /// Encoded width of child addresses, in `[1, 8]`. Ignored when
    /// there are no children.
    pub child_address_length: u8,
    /// Whether the node is the tree root.
    pub is_root: bool,
}

impl NodeImage<'_> {
    /// The node's type tag.
    #[must_use]
    pub fn tag(&self) -> NodeTag {
        NodeTag::node(self.value.is_some(), !self.children.is_empty(), self.is_root)
    }

    /// Encode the payload (everything after the tag byte).
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();

        write_compressed_u64(&mut out, self.key_suffix.len() as u64);
        out.extend_from_slice(self.key_suffix);

        if let Some(value) = self.value {
            write_compressed_u64(&mut out, value.len() as u64);
            out.extend_from_slice(value);
        }

        if !self.children.is_empty() {
            let width = u64::from(self.child_address_length);
            check_address_length(width)?;
            let count = self.children.len() as u64;
            write_compressed_u64(&mut out, (count << 3) | (width - 1));

            let mut last_byte = None;
            for &(first_byte, address) in self.children {
                assert!(
                    last_byte < Some(first_byte),
                    "child table must be strictly ascending by key byte"
                );
                last_byte = Some(first_byte);

                if width < 8 && address.raw() >> (8 * width) != 0 {
                    return Err(IronwoodError::InvalidAddress {
                        address: address.raw(),
                        detail: "child address does not fit the declared width",
                    });
                }
                out.push(first_byte);
                for shift in (0..width).rev() {
                    out.push((address.raw() >> (8 * shift)) as u8);
                }
            }
        }

        Ok(out)
    }

    /// Encode and append to an in-memory log, returning the node address.
    pub fn append_to(&self, log: &MemoryLog) -> Result<Address> {
        Ok(log.append(self.tag(), &self.encode()?))
    }
}
