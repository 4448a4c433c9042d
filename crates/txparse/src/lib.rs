//! Lifts base-chain transactions into typed OPNet contract operations.
//!
//! Recognition is witness-driven: a transaction is OPNet-relevant exactly
//! when its first input's tap leaf script carries the OPNet envelope. A
//! transaction that looks like an envelope but fails any structural check
//! is `MalformedWitness`; the block processor demotes those to generic,
//! the mempool rejects them.

mod classify;
mod envelope;
mod errors;
mod output;

#[cfg(any(test, feature = "test_utils"))]
pub mod builder;

pub use classify::{
    classify_transaction, derive_contract_address, DeploymentData, InteractionData, ParsedTx,
    TxPayload,
};
pub use envelope::{
    EnvelopeDiscriminator, FeatureFlags, OpnetHeader, FLAG_ACCESS_LIST, FLAG_EPOCH_SUBMISSION,
    FLAG_MLDSA_LINK_PUBKEY, OPNET_MAGIC,
};
pub use errors::ParseError;
pub use output::classify_script;
