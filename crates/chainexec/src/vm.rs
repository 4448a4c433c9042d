use opnet_primitives::{Buf32, ContractAddress, StoragePointer, StorageValue};

use crate::errors::{EngineError, HostAbort, VmError};

/// Committed-state view the engine reads through when neither the overlay
/// nor the preload has a slot. The block processor backs this with the
/// open snapshot.
pub trait StateReader {
    fn pointer(
        &self,
        contract: &ContractAddress,
        pointer: &StoragePointer,
    ) -> Result<Option<StorageValue>, EngineError>;

    fn contract(&self, address: &ContractAddress) -> Result<Option<ContractDef>, EngineError>;
}

/// The slice of a contract record execution needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractDef {
    pub address: ContractAddress,
    pub bytecode: Vec<u8>,
}

/// Call view handed to the VM for one frame.
#[derive(Debug, Clone)]
pub struct VmInvocation<'a> {
    pub contract: ContractAddress,
    pub calldata: &'a [u8],
    pub tx_origin: Buf32,
    pub msg_sender: Buf32,
    pub block_height: u64,
    pub block_median_time: u64,
    pub is_constructor: bool,
}

/// Clean VM completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VmOutcome {
    pub return_data: Vec<u8>,
}

/// Result of a nested external call as seen by the calling contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOutcome {
    pub success: bool,
    pub return_data: Vec<u8>,
}

/// Host interface the engine exposes to the running VM.
///
/// Every operation is metered; a `HostAbort` error means the frame is
/// over and must be propagated out of the VM unchanged.
pub trait VmHost {
    fn charge_gas(&mut self, amount: u64) -> Result<(), HostAbort>;

    fn storage_read(
        &mut self,
        pointer: &StoragePointer,
    ) -> Result<Option<StorageValue>, HostAbort>;

    fn storage_write(
        &mut self,
        pointer: &StoragePointer,
        value: StorageValue,
    ) -> Result<(), HostAbort>;

    fn emit_event(&mut self, event_type: &str, data: &[u8]) -> Result<(), HostAbort>;

    /// Calls another contract; the engine runs it as a child frame on the
    /// shared overlay. A failed child surfaces as `success == false`, its
    /// writes rolled back and its gas spent.
    fn external_call(
        &mut self,
        target: &ContractAddress,
        calldata: &[u8],
    ) -> Result<CallOutcome, HostAbort>;

    /// Deploys a new contract from within execution.
    fn deploy(&mut self, bytecode: &[u8], seed: &Buf32) -> Result<CallOutcome, HostAbort>;
}

/// The deterministic VM capability contract.
///
/// Any VM satisfying this is acceptable: it must be a pure function of
/// `(bytecode, invocation, host interactions)`, observing no wall clock,
/// no randomness and no floating-point state visible to the contract.
pub trait ContractVm: Send + Sync {
    fn run(
        &self,
        bytecode: &[u8],
        invocation: &VmInvocation<'_>,
        host: &mut dyn VmHost,
    ) -> Result<VmOutcome, VmError>;
}
