//! Scripted VM and in-memory state for engine tests here and in the
//! block processor.

use std::collections::HashMap;

use opnet_primitives::{Buf32, ContractAddress, StoragePointer, StorageValue};

use crate::{
    engine::derive_subdeploy_address,
    errors::{EngineError, VmError},
    vm::{ContractDef, ContractVm, StateReader, VmHost, VmInvocation, VmOutcome},
};

pub fn test_address(seed: u8) -> ContractAddress {
    ContractAddress::from([seed; 32])
}

pub fn test_pointer(seed: u8) -> StoragePointer {
    StoragePointer::from([seed; 32])
}

pub fn test_value(seed: u8) -> StorageValue {
    StorageValue::from([seed; 32])
}

/// One step of a scripted contract.
#[derive(Debug, Clone)]
pub enum TestOp {
    ChargeGas(u64),
    /// Write `pointer(seed) = value(seed)` in the running contract's
    /// storage.
    Write(u8, u8),
    /// Read a pointer, discarding the value.
    Read(u8),
    /// Return the raw bytes stored at a pointer (zeroes when absent).
    ReturnStorage(u8),
    Emit(&'static str, usize),
    /// Call another contract, ignoring failure.
    Call(ContractAddress),
    /// Call another contract; trap if the call fails.
    RequireCallSuccess(ContractAddress),
    /// Deploy scripted bytecode under the given seed.
    Deploy(u8),
    Trap(&'static str),
    Return(Vec<u8>),
}

/// Deterministic scripted VM: each contract address maps to a list of
/// ops, run in order. Contracts without a program return empty.
#[derive(Debug, Default)]
pub struct TestVm {
    programs: HashMap<ContractAddress, Vec<TestOp>>,
}

impl TestVm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn program(mut self, address: ContractAddress, ops: Vec<TestOp>) -> Self {
        self.programs.insert(address, ops);
        self
    }

    /// Address a scripted `Deploy(seed)` op will land at when run from
    /// `deployer`.
    pub fn deployed_address(deployer: &ContractAddress, seed: u8) -> ContractAddress {
        derive_subdeploy_address(deployer, &Buf32::new([seed; 32]))
    }
}

impl ContractVm for TestVm {
    fn run(
        &self,
        _bytecode: &[u8],
        invocation: &VmInvocation<'_>,
        host: &mut dyn VmHost,
    ) -> Result<VmOutcome, VmError> {
        let ops = self
            .programs
            .get(&invocation.contract)
            .cloned()
            .unwrap_or_default();

        for op in ops {
            match op {
                TestOp::ChargeGas(amount) => host.charge_gas(amount)?,
                TestOp::Write(p, v) => {
                    host.storage_write(&test_pointer(p), test_value(v))?;
                }
                TestOp::Read(p) => {
                    host.storage_read(&test_pointer(p))?;
                }
                TestOp::ReturnStorage(p) => {
                    let value = host.storage_read(&test_pointer(p))?;
                    let bytes = value.unwrap_or_else(|| StorageValue::from([0u8; 32]));
                    return Ok(VmOutcome {
                        return_data: bytes.as_bytes().to_vec(),
                    });
                }
                TestOp::Emit(event_type, len) => {
                    host.emit_event(event_type, &vec![0xee; len])?;
                }
                TestOp::Call(target) => {
                    host.external_call(&target, &[0u8; 4])?;
                }
                TestOp::RequireCallSuccess(target) => {
                    let outcome = host.external_call(&target, &[0u8; 4])?;
                    if !outcome.success {
                        return Err(VmError::Trap("required call failed".to_string()));
                    }
                }
                TestOp::Deploy(seed) => {
                    host.deploy(&[0xc0, 0xde], &Buf32::new([seed; 32]))?;
                }
                TestOp::Trap(message) => return Err(VmError::Trap(message.to_string())),
                TestOp::Return(data) => return Ok(VmOutcome { return_data: data }),
            }
        }

        Ok(VmOutcome::default())
    }
}

/// In-memory committed-state stand-in.
#[derive(Debug, Default)]
pub struct TestState {
    pub contracts: HashMap<ContractAddress, Vec<u8>>,
    pub pointers: HashMap<(ContractAddress, StoragePointer), StorageValue>,
}

impl TestState {
    pub fn with_contract(mut self, address: ContractAddress) -> Self {
        self.contracts.insert(address, vec![0x00]);
        self
    }

    pub fn with_pointer(
        mut self,
        address: ContractAddress,
        pointer: StoragePointer,
        value: StorageValue,
    ) -> Self {
        self.pointers.insert((address, pointer), value);
        self
    }
}

impl StateReader for TestState {
    fn pointer(
        &self,
        contract: &ContractAddress,
        pointer: &StoragePointer,
    ) -> Result<Option<StorageValue>, EngineError> {
        Ok(self.pointers.get(&(*contract, *pointer)).copied())
    }

    fn contract(&self, address: &ContractAddress) -> Result<Option<ContractDef>, EngineError> {
        Ok(self.contracts.get(address).map(|bytecode| ContractDef {
            address: *address,
            bytecode: bytecode.clone(),
        }))
    }
}
