use thiserror::Error;

/// Why a frame reverted. A revert is a normal contract outcome; it is
/// recorded in the receipt and never fails the block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevertReason {
    OutOfGas,
    DepthExceeded,
    ReceiptTooLarge,
    ContractTrap(String),
}

impl std::fmt::Display for RevertReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RevertReason::OutOfGas => f.write_str("out of gas"),
            RevertReason::DepthExceeded => f.write_str("call depth exceeded"),
            RevertReason::ReceiptTooLarge => f.write_str("receipt too large"),
            RevertReason::ContractTrap(msg) => write!(f, "contract trap: {msg}"),
        }
    }
}

/// Infrastructure failure during execution. Unlike a revert this aborts
/// the block drive; the caller decides whether it is retryable.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("state read: {0}")]
    State(String),
}

/// Raised by the host into the running VM when the frame must stop right
/// now. A compliant VM propagates this out unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostAbort {
    OutOfGas,
    ReceiptTooLarge,
    /// Underlying state access failed; becomes [`EngineError`].
    Fatal(String),
}

/// What a VM run can produce besides a clean outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    /// The contract itself trapped (bad memory access, explicit revert,
    /// invalid bytecode).
    Trap(String),
    /// Host-initiated stop, propagated unchanged.
    Abort(HostAbort),
}

impl From<HostAbort> for VmError {
    fn from(abort: HostAbort) -> Self {
        VmError::Abort(abort)
    }
}
