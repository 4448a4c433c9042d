use thiserror::Error;

/// Consensus table errors. All of these are fatal to block processing.
#[derive(Debug, Clone, Error)]
pub enum ConsensusError {
    /// Reached a scheduled upgrade without being ready for it. The node
    /// must halt and refuse further blocks (lockdown).
    #[error("consensus {current} is not ready for {next} at height {height}")]
    NotReady {
        current: String,
        next: String,
        height: u64,
    },

    /// No parameter set covers the given height.
    #[error("no consensus enabled at height {0}")]
    NoneActive(u64),

    /// The table is not strictly ascending by activation height.
    #[error("consensus {name} activates at {enabled_at_block}, not after its predecessor")]
    Downgrade { name: String, enabled_at_block: u64 },
}
