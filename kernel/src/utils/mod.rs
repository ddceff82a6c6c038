//! Shared lock-free-friendly primitives used by every other module: an
//! intrusive doubly-linked list, a fixed-capacity ring buffer, and a small
//! open-addressing hash table.

pub mod hash_table;
pub mod list;
pub mod ring_buffer;

pub use hash_table::HashTable;
pub use list::{IntrusiveList, Linked};
pub use ring_buffer::RingBuffer;
