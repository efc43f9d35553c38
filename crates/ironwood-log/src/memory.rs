//! Append-only in-memory log.
//!
//! Backs unit tests and small embedded stores. Each appended record is
//! held as its own `Arc<[u8]>` allocation, so payload views handed out
//! by [`LogReader::loggable_at`] stay valid for as long as any reader
//! keeps them, independent of later appends.

use std::collections::BTreeMap;
use std::sync::Arc;

use ironwood_error::{IronwoodError, Result};
use ironwood_types::{Address, NodeTag};
use parking_lot::Mutex;

use crate::cursor::BytesWithAddress;
use crate::loggable::{LogReader, Loggable};

#[derive(Debug, Default)]
struct State {
    /// Record start address → (tag, payload).
    records: BTreeMap<u64, (NodeTag, Arc<[u8]>)>,
    /// Next free address; each record occupies 1 tag byte + payload.
    tail: u64,
}

/// An append-only log held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryLog {
    state: Mutex<State>,
}

impl MemoryLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record, returning its address.
    pub fn append(&self, tag: NodeTag, payload: &[u8]) -> Address {
        let mut state = self.state.lock();
        let address = state.tail;
        state.tail += 1 + payload.len() as u64;
        state.records.insert(address, (tag, Arc::from(payload)));
        Address::new(address)
    }

    /// Number of records appended so far.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.state.lock().records.len()
    }

    /// The address one past the last appended record; the next append
    /// lands here.
    #[must_use]
    pub fn high_address(&self) -> Address {
        Address::new(self.state.lock().tail)
    }
}

impl LogReader for MemoryLog {
    fn loggable_at(&self, address: Address) -> Result<Loggable> {
        let state = self.state.lock();
        let (tag, payload) = state
            .records
            .get(&address.raw())
            .ok_or(IronwoodError::InvalidAddress {
                address: address.raw(),
                detail: "no loggable starts at this address",
            })?;
        let len = payload.len();
        let data = BytesWithAddress::new(Arc::clone(payload), 0, len, address.offset_by(1));
        Ok(Loggable::new(address, *tag, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_resolve() {
        let log = MemoryLog::new();
        let tag = NodeTag::node(true, false, false);
        let a0 = log.append(tag, &[1, 2, 3]);
        let a1 = log.append(NodeTag::node(false, true, false), &[4]);

        assert_eq!(a0, Address::new(0));
        assert_eq!(a1, Address::new(4));

        let loggable = log.loggable_at(a0).unwrap();
        assert_eq!(loggable.address(), a0);
        assert_eq!(loggable.tag(), tag);
        assert_eq!(loggable.data_address(), Address::new(1));
        assert_eq!(loggable.data().as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn unknown_address_is_invalid() {
        let log = MemoryLog::new();
        log.append(NodeTag::node(false, false, false), &[0xFF]);
        let err = log.loggable_at(Address::new(1)).unwrap_err();
        assert!(matches!(err, IronwoodError::InvalidAddress { address: 1, .. }));
    }

    #[test]
    fn views_survive_later_appends() {
        let log = MemoryLog::new();
        let a0 = log.append(NodeTag::node(true, false, false), &[7, 7, 7]);
        let loggable = log.loggable_at(a0).unwrap();
        for i in 0..100u8 {
            log.append(NodeTag::node(false, false, false), &[i]);
        }
        assert_eq!(loggable.data().as_slice(), &[7, 7, 7]);
    }
}
