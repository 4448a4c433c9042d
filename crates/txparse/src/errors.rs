use thiserror::Error;

/// Transaction-scoped parse failures.
#[derive(Debug, Clone, Error)]
pub enum ParseError {
    /// The witness looked like an envelope but violated a structural
    /// check. Demoted to generic by the block processor.
    #[error("malformed witness: {0}")]
    MalformedWitness(String),

    /// The envelope frame was intact but its payload is unusable
    /// (oversize calldata, bad discriminator, bad compression stream).
    #[error("bad envelope: {0}")]
    BadEnvelope(String),

    /// Declared priority fee exceeds the active consensus bound.
    #[error("priority fee {declared} exceeds bound {max}")]
    ExcessivePriorityFee { declared: u64, max: u64 },
}
