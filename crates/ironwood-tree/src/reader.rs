//! Tree read façade.
//!
//! Owns the seam between addresses and node views: given a log address,
//! fetch the loggable, check it is a Patricia node, and hand back an
//! [`ImmutableNode`]. Also carries the full-key lookup that drives the
//! whole read path: descend from the root, matching each node's edge
//! label and branching on the next key byte.

use std::sync::Arc;

use ironwood_error::{IronwoodError, Result};
use ironwood_log::LogReader;
use ironwood_types::Address;
use tracing::warn;

use crate::node::ImmutableNode;

/// Read-only access to one Patricia tree rooted in the log.
pub struct PatriciaTreeReader {
    log: Arc<dyn LogReader>,
    root_address: Address,
}

impl PatriciaTreeReader {
    /// Open a tree whose root node lives at `root_address`. The null
    /// address denotes an empty tree.
    #[must_use]
    pub fn new(log: Arc<dyn LogReader>, root_address: Address) -> Self {
        Self { log, root_address }
    }

    /// Address of the root node.
    #[inline]
    #[must_use]
    pub const fn root_address(&self) -> Address {
        self.root_address
    }

    /// Load the node at `address`.
    ///
    /// Fails with `InvalidAddress` if the address does not resolve to a
    /// Patricia-node loggable, or with a format error if the node image
    /// is corrupt.
    pub fn load_node(&self, address: Address) -> Result<ImmutableNode> {
        if address.is_null() {
            return Ok(ImmutableNode::empty());
        }
        let loggable = self.log.loggable_at(address)?;
        if !loggable.tag().is_patricia_node() {
            warn!(address = address.raw(), tag = loggable.tag().as_byte(), "not a Patricia node");
            return Err(IronwoodError::InvalidAddress {
                address: address.raw(),
                detail: "loggable is not a Patricia node",
            });
        }
        ImmutableNode::from_loggable(loggable)
    }

    /// Load the root node.
    pub fn root(&self) -> Result<ImmutableNode> {
        self.load_node(self.root_address)
    }

    /// Look up `key`, returning its value if present.
    ///
    /// Descends from the root: each node consumes its edge label, then
    /// the next key byte selects a child. A node reached with the key
    /// exhausted yields its value (or `None` for a branch-only node).
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut node = self.root()?;
        let mut pos = 0usize;
        loop {
            let suffix = node.key_suffix();
            if key.len() - pos < suffix.len() || &key[pos..pos + suffix.len()] != suffix {
                return Ok(None);
            }
            pos += suffix.len();
            if pos == key.len() {
                return Ok(node.value().map(<[u8]>::to_vec));
            }
            match node.get_child(self, key[pos])? {
                Some(child) => {
                    node = child;
                    pos += 1;
                }
                None => return Ok(None),
            }
        }
    }
}
