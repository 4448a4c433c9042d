//! Canonical per-block ordering of OPNet transactions.
//!
//! The order is a stable total order over the block's contract
//! transactions: parents (producers of consumed outputs) always precede
//! children, higher effective fees go first, and remaining ties break on
//! the indexing hash. Same multiset in, same order out, on every
//! implementation.

mod sorter;

pub use sorter::{indexing_hash, sort_block, SortError, SortableTx};
