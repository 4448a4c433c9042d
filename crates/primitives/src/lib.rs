//! Shared primitive types for the OPNet node.
//!
//! Identity types here are plain byte wrappers with fixed encodings; all
//! node crates depend on this one and nothing here depends on the rest of
//! the workspace.

mod block;
mod buf;
mod contract;
mod hash;
mod script;

pub use block::{BlockRef, L1BlockId, OpTxId};
pub use buf::{Buf32, BufError};
pub use contract::{ContractAddress, StoragePointer, StorageValue};
pub use hash::{merkle_root, sha256, sha256_concat};
pub use script::ScriptKind;
