//! Deterministic, gas-metered contract execution.
//!
//! The engine drives any VM satisfying the [`ContractVm`] capability
//! contract against a journaled storage overlay. External calls re-enter
//! the engine as child frames sharing the transaction's overlay and gas
//! meter; a reverted child rolls its writes back but its gas stays spent.
//! Nothing in here touches a clock, ambient randomness, or floating
//! point.

mod engine;
mod errors;
mod frame;
mod gas;
mod overlay;
mod vm;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

pub use engine::{derive_subdeploy_address, CallExecutor, TxContext};
pub use errors::{EngineError, HostAbort, RevertReason, VmError};
pub use frame::{
    ExecStatus, ExecutionFrame, ExecutionResult, FrameEvent, FrameInput, FrameOutput, NewContract,
};
pub use gas::GasMeter;
pub use overlay::StorageOverlay;
pub use vm::{CallOutcome, ContractDef, ContractVm, StateReader, VmHost, VmInvocation, VmOutcome};
