//! Mempool admission, verification and dependency tracking.
//!
//! Admission runs `decode → classify → verify → link → insert`; every
//! rejection is a value returned to the caller, mapped to a 4xx at the
//! API boundary. The dependency graph lives in an arena keyed by dense
//! indices; entries never hold owning references to each other.

mod dag;
mod entry;
mod errors;
mod pool;
mod verify;

pub use dag::DependencyDag;
pub use entry::{KnownTransaction, MempoolEntry};
pub use errors::MempoolError;
pub use pool::{AdmissionQueue, MemoryRowStore, Mempool, RowStore, Submission};
pub use verify::{
    MlDsaVerifier, RejectingMlDsa, StandardVerifier, TxVerifier, UncheckedMlDsa, VerifyContext,
};
