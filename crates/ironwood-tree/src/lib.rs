//! Immutable Patricia-trie read path.
//!
//! A Patricia node is read directly out of its log record through a byte
//! cursor; child lookup, range scans, and bidirectional iteration all
//! operate on the raw encoded form. No node is ever deserialised to a
//! heap object: a [`node::ImmutableNode`] is a thin view over the
//! pinned log page.
//!
//! The write path (node mutation, splits, rebalancing) lives in the
//! mutable tree and is not part of this crate.

pub mod encode;
pub mod node;
pub mod reader;


pub use encode::NodeImage;
pub use node::{ChildReference, ChildrenIterator, ImmutableNode, check_address_length};
pub use reader::PatriciaTreeReader;
