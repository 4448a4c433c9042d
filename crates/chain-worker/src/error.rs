use opnet_btcio::L1Error;
use opnet_chainexec::EngineError;
use opnet_db::DbError;
use opnet_ordering::SortError;
use opnet_params::ConsensusError;
use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Block processor failures.
///
/// Transient upstream errors and storage conflicts are retried with
/// backoff; everything else halts the pipeline.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Upstream(#[from] L1Error),

    #[error(transparent)]
    Storage(#[from] DbError),

    /// Consensus gate failure: lockdown, no fallback.
    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    /// A dependency cycle inside a committed block is corruption.
    #[error("sorter: {0}")]
    Sort(#[from] SortError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The reorg walked past the configured depth bound.
    #[error("reorg deeper than {max_depth} blocks (fork below height {floor})")]
    ReorgTooDeep { max_depth: u64, floor: u64 },

    /// Retry budget exhausted on a retryable error.
    #[error("retries exhausted: {0}")]
    RetriesExhausted(String),
}

impl WorkerError {
    /// True when re-driving the same height may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Upstream(e) => e.is_transient(),
            WorkerError::Storage(DbError::Conflict(_)) => true,
            _ => false,
        }
    }

    /// True when the node must halt with a fatal alert. An exhausted
    /// retry budget is not fatal: the next tip event re-drives the
    /// height.
    pub fn is_fatal(&self) -> bool {
        match self {
            WorkerError::Consensus(_)
            | WorkerError::Sort(_)
            | WorkerError::Engine(_)
            | WorkerError::ReorgTooDeep { .. } => true,
            WorkerError::RetriesExhausted(_) => false,
            WorkerError::Upstream(e) => !e.is_transient(),
            WorkerError::Storage(e) => e.is_fatal(),
        }
    }
}
