//! Log read path: byte cursors, compressed unsigned longs, loggables.
//!
//! Everything the Patricia trie reads comes through here. A [`Loggable`]
//! is a typed record in the append-only log; its payload is exposed as a
//! [`BytesWithAddress`], a shared read-only view that pins the backing
//! page for as long as any view or node holds it. Cursors over that view
//! are the hot read path and never allocate.

mod compressed;
mod cursor;
mod loggable;
mod memory;

pub use compressed::{
    MAX_COMPRESSED_LEN, compressed_len, read_compressed_u64, write_compressed_u64,
};
pub use cursor::{AddressedCursor, ByteCursor, BytesWithAddress};
pub use loggable::{LogReader, Loggable};
pub use memory::MemoryLog;
