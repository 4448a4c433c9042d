//! Storage engine for the OPNet node.
//!
//! Sled-backed, borsh-encoded, versioned persistence. All block-scoped
//! writes go through a [`BlockSnapshot`] obtained from
//! [`SledNodeStorage::open_snapshot`]; the snapshot buffers everything and
//! commits in one pass, advancing the committed tip last. Reads are
//! height-versioned: a pointer read at height `H` returns the entry with
//! the greatest `last_seen_at ≤ H`.

mod errors;
mod schema;
mod snapshot;
mod store;
mod types;

pub use errors::{DbError, DbResult};
pub use snapshot::{BlockSnapshot, PointerWrite};
pub use store::SledNodeStorage;
pub use types::{
    ContractRecord, EpochRecord, EventRecord, HeaderRecord, MempoolRow, ReceiptRecord,
    ReceiptStatus, StorageEntry, TxKind, TxRecord, UtxoRecord,
};

#[cfg(feature = "test_utils")]
pub mod test_utils;
