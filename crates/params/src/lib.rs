//! Consensus parameter tables for the OPNet node.
//!
//! Consensus lookups are pure functions of height against an immutable,
//! sorted table; there is no global parameter singleton anywhere in the
//! workspace.

mod consensus;
mod defaults;
mod error;
mod network;
mod registry;

pub use consensus::{
    ConsensusFeatures, ConsensusParams, EpochParams, NetworkLimits, PsbtParams, TransactionLimits,
};
pub use defaults::default_registry;
pub use error::ConsensusError;
pub use network::NetworkKind;
pub use registry::ConsensusRegistry;
