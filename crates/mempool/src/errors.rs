use opnet_txparse::ParseError;
use thiserror::Error;

/// Admission rejections. Returned to the caller, never thrown across the
/// bus.
#[derive(Debug, Clone, Error)]
pub enum MempoolError {
    /// Raw bytes did not decode as the claimed format.
    #[error("decode: {0}")]
    Decode(String),

    /// Payload exceeds the consensus broadcast size limit.
    #[error("payload of {size} bytes exceeds limit {limit}")]
    Oversize { size: usize, limit: usize },

    /// Envelope parse failure; envelope-carrying mempool entries are
    /// rejected rather than demoted.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Signature material failed verification.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// The admission queue is full; the caller may retry later.
    #[error("mempool congested")]
    Congested,

    /// An entry with the same `(identifier, psbt)` already exists.
    #[error("duplicate entry")]
    DuplicatePsbt,

    /// Fee rate below the consensus floor.
    #[error("fee rate {rate_sat_vb} sat/vB below floor {floor_sat_vb}")]
    FeeTooLow {
        rate_sat_vb: u64,
        floor_sat_vb: u64,
    },

    /// Accepting the entry would close a dependency cycle.
    #[error("dependency cycle")]
    Cycle,

    /// The backing row store failed.
    #[error("store: {0}")]
    Store(String),
}
