use std::collections::HashMap;

use opnet_primitives::{Buf32, ContractAddress, StoragePointer, StorageValue};

use crate::errors::RevertReason;

/// A transaction input as exposed to contracts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInput {
    pub txid: Buf32,
    pub vout: u32,
}

/// A transaction output as exposed to contracts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameOutput {
    pub value_sat: u64,
    pub script: Vec<u8>,
}

/// Everything one call frame needs. Block time and height come in
/// explicitly; execution must observe no ambient environment.
#[derive(Debug, Clone)]
pub struct ExecutionFrame {
    pub contract_address: ContractAddress,
    pub calldata: Vec<u8>,

    /// Identity of the transaction originator (stable digest of the
    /// sender key material).
    pub tx_origin: Buf32,
    /// Immediate caller: equals `tx_origin` at the top level, the calling
    /// contract's address digest in child frames.
    pub msg_sender: Buf32,

    pub block_height: u64,
    pub block_median_time: u64,

    pub call_depth: u16,
    pub deploy_depth: u16,
    pub is_constructor: bool,

    pub inputs: Vec<FrameInput>,
    pub outputs: Vec<FrameOutput>,

    /// Pointer values prefetched for this transaction; consulted between
    /// the overlay and the snapshot.
    pub preload_storage: HashMap<StoragePointer, StorageValue>,

    /// Declared access list, present when the envelope carried one.
    pub access_list: Option<Vec<(ContractAddress, StoragePointer)>>,
}

impl ExecutionFrame {
    /// Derives the child frame for an external call out of this one.
    pub fn child_call(&self, target: ContractAddress, calldata: Vec<u8>) -> Self {
        Self {
            contract_address: target,
            calldata,
            tx_origin: self.tx_origin,
            msg_sender: *self.contract_address.inner(),
            block_height: self.block_height,
            block_median_time: self.block_median_time,
            call_depth: self.call_depth + 1,
            deploy_depth: self.deploy_depth,
            is_constructor: false,
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
            preload_storage: HashMap::new(),
            access_list: None,
        }
    }

    /// Derives the constructor frame for a nested deployment.
    pub fn child_deploy(&self, address: ContractAddress, calldata: Vec<u8>) -> Self {
        let mut frame = self.child_call(address, calldata);
        frame.deploy_depth = self.deploy_depth + 1;
        frame.is_constructor = true;
        frame
    }
}

/// An event captured during execution, already size-checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameEvent {
    pub contract: ContractAddress,
    pub event_type: String,
    pub data: Vec<u8>,
}

/// A contract deployed during execution, pending promotion at commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContract {
    pub address: ContractAddress,
    pub bytecode: Vec<u8>,
    pub deployed_at_block: u64,
}

/// Terminal frame status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecStatus {
    Completed,
    Reverted(RevertReason),
}

impl ExecStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, ExecStatus::Completed)
    }
}

/// Outcome of one frame (for the top-level frame: of the transaction).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub status: ExecStatus,
    /// Gas consumed by this frame and everything below it.
    pub gas_used: u64,
    pub return_data: Vec<u8>,
    pub events: Vec<FrameEvent>,
    pub deployed_contracts: Vec<NewContract>,
}
