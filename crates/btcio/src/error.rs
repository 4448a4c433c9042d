use thiserror::Error;

pub type L1Result<T> = Result<T, L1Error>;

/// Upstream RPC failures, split by retryability.
///
/// Transient failures are retried by the block processor with backoff;
/// fatal ones halt the pipeline.
#[derive(Debug, Clone, Error)]
pub enum L1Error {
    #[error("upstream (transient): {0}")]
    Transient(String),

    #[error("upstream (fatal): {0}")]
    Fatal(String),
}

impl L1Error {
    pub fn is_transient(&self) -> bool {
        matches!(self, L1Error::Transient(_))
    }

    /// Classifies an upstream error message.
    ///
    /// Connection-shaped failures are retryable; authentication and
    /// malformed-response failures are not, since retrying cannot fix a
    /// misconfigured node.
    pub(crate) fn classify(message: String) -> Self {
        let lower = message.to_ascii_lowercase();
        let fatal = ["auth", "unauthorized", "401", "403", "parse", "malformed"]
            .iter()
            .any(|needle| lower.contains(needle));
        if fatal {
            L1Error::Fatal(message)
        } else {
            L1Error::Transient(message)
        }
    }
}
