use opnet_params::TransactionLimits;
use opnet_primitives::{Buf32, ContractAddress, StoragePointer, StorageValue};
use tracing::trace;

use crate::{
    errors::{EngineError, HostAbort, RevertReason, VmError},
    frame::{ExecStatus, ExecutionFrame, ExecutionResult, FrameEvent, NewContract},
    gas::GasMeter,
    overlay::StorageOverlay,
    vm::{CallOutcome, ContractVm, StateReader, VmHost, VmInvocation, VmOutcome},
};

/// Flat cost of entering a frame.
const GAS_FRAME_BASE: u64 = 10_000;
/// Cost of a storage slot read.
const GAS_STORAGE_READ: u64 = 300;
/// Flat cost of a storage slot write; new-slot creation adds the
/// per-consensus `storage_cost_per_byte × 32` on top.
const GAS_STORAGE_WRITE: u64 = 1_000;
/// Event emission: flat plus per payload byte.
const GAS_EVENT_BASE: u64 = 375;
const GAS_EVENT_PER_BYTE: u64 = 8;

/// Domain tag for addresses of contracts deployed from within execution.
const SUBDEPLOY_TAG: &[u8] = b"opnet-subdeploy";

/// Per-transaction mutable execution state: one overlay, one gas meter,
/// one list of pending deployments, shared by every frame.
#[derive(Debug)]
pub struct TxContext {
    pub overlay: StorageOverlay,
    pub gas: GasMeter,
    pub deployed: Vec<NewContract>,
}

impl TxContext {
    pub fn new(max_gas: u64) -> Self {
        Self {
            overlay: StorageOverlay::new(),
            gas: GasMeter::new(max_gas),
            deployed: Vec::new(),
        }
    }

    /// Context resuming from gas already burned by earlier frames of the
    /// same transaction envelope.
    pub fn with_gas_used(max_gas: u64, gas_used_so_far: u64) -> Self {
        let mut ctx = Self::new(max_gas);
        // Pre-charge; exhaustion here just means the first charge fails.
        let _ = ctx.gas.charge(gas_used_so_far);
        ctx
    }
}

/// Derives the address for a contract deployed by another contract.
pub fn derive_subdeploy_address(deployer: &ContractAddress, seed: &Buf32) -> ContractAddress {
    let mut preimage = Vec::with_capacity(SUBDEPLOY_TAG.len() + 64);
    preimage.extend_from_slice(SUBDEPLOY_TAG);
    preimage.extend_from_slice(deployer.as_bytes());
    preimage.extend_from_slice(seed.as_bytes());
    ContractAddress::new(opnet_primitives::sha256(&preimage))
}

/// Drives frames against a VM and a state view.
#[derive(Debug)]
pub struct CallExecutor<'e, R, V> {
    reader: &'e R,
    vm: &'e V,
    limits: &'e TransactionLimits,
}

impl<'e, R: StateReader, V: ContractVm> CallExecutor<'e, R, V> {
    pub fn new(reader: &'e R, vm: &'e V, limits: &'e TransactionLimits) -> Self {
        Self { reader, vm, limits }
    }

    /// Executes one frame to a terminal state.
    ///
    /// A revert rolls the overlay (and pending deployments) back to the
    /// frame entry point but keeps the gas spent. Only infrastructure
    /// failures return `Err`.
    pub fn execute(
        &self,
        frame: &ExecutionFrame,
        ctx: &mut TxContext,
    ) -> Result<ExecutionResult, EngineError> {
        let gas_start = ctx.gas.used();
        let overlay_cp = ctx.overlay.checkpoint();
        let deployed_cp = ctx.deployed.len();

        if frame.call_depth > self.limits.max_call_depth
            || frame.deploy_depth > self.limits.max_deploy_depth
        {
            return Ok(reverted(RevertReason::DepthExceeded, 0));
        }

        if let Err(abort) = ctx.gas.charge(GAS_FRAME_BASE) {
            return self.abort_result(abort, ctx, gas_start, overlay_cp, deployed_cp);
        }

        let Some(bytecode) = self.resolve_bytecode(&frame.contract_address, ctx)? else {
            return Ok(reverted(
                RevertReason::ContractTrap(format!(
                    "no contract at {}",
                    frame.contract_address
                )),
                ctx.gas.used() - gas_start,
            ));
        };

        let invocation = VmInvocation {
            contract: frame.contract_address,
            calldata: &frame.calldata,
            tx_origin: frame.tx_origin,
            msg_sender: frame.msg_sender,
            block_height: frame.block_height,
            block_median_time: frame.block_median_time,
            is_constructor: frame.is_constructor,
        };

        let mut host = FrameHost {
            executor: self,
            frame,
            ctx,
            events: Vec::new(),
        };
        let vm_result = self.vm.run(&bytecode, &invocation, &mut host);
        let FrameHost { events, .. } = host;

        match vm_result {
            Ok(VmOutcome { return_data }) => {
                if return_data.len() > self.limits.max_receipt_len {
                    ctx.overlay.rollback_to(overlay_cp);
                    ctx.deployed.truncate(deployed_cp);
                    return Ok(reverted(
                        RevertReason::ReceiptTooLarge,
                        ctx.gas.used() - gas_start,
                    ));
                }
                trace!(contract = %frame.contract_address, depth = frame.call_depth, "frame completed");
                Ok(ExecutionResult {
                    status: ExecStatus::Completed,
                    gas_used: ctx.gas.used() - gas_start,
                    return_data,
                    events,
                    deployed_contracts: ctx.deployed[deployed_cp..].to_vec(),
                })
            }
            Err(VmError::Trap(message)) => {
                ctx.overlay.rollback_to(overlay_cp);
                ctx.deployed.truncate(deployed_cp);
                Ok(reverted(
                    RevertReason::ContractTrap(message),
                    ctx.gas.used() - gas_start,
                ))
            }
            Err(VmError::Abort(abort)) => {
                self.abort_result(abort, ctx, gas_start, overlay_cp, deployed_cp)
            }
        }
    }

    fn abort_result(
        &self,
        abort: HostAbort,
        ctx: &mut TxContext,
        gas_start: u64,
        overlay_cp: usize,
        deployed_cp: usize,
    ) -> Result<ExecutionResult, EngineError> {
        ctx.overlay.rollback_to(overlay_cp);
        ctx.deployed.truncate(deployed_cp);
        match abort {
            HostAbort::OutOfGas => Ok(reverted(
                RevertReason::OutOfGas,
                ctx.gas.used() - gas_start,
            )),
            HostAbort::ReceiptTooLarge => Ok(reverted(
                RevertReason::ReceiptTooLarge,
                ctx.gas.used() - gas_start,
            )),
            HostAbort::Fatal(message) => Err(EngineError::State(message)),
        }
    }

    /// Bytecode lookup: same-transaction deployments first, then the
    /// snapshot view.
    fn resolve_bytecode(
        &self,
        address: &ContractAddress,
        ctx: &TxContext,
    ) -> Result<Option<Vec<u8>>, EngineError> {
        if let Some(new) = ctx.deployed.iter().find(|c| c.address == *address) {
            return Ok(Some(new.bytecode.clone()));
        }
        Ok(self.reader.contract(address)?.map(|def| def.bytecode))
    }

    fn contract_exists(&self, address: &ContractAddress, ctx: &TxContext) -> Result<bool, EngineError> {
        Ok(self.resolve_bytecode(address, ctx)?.is_some())
    }
}

fn reverted(reason: RevertReason, gas_used: u64) -> ExecutionResult {
    ExecutionResult {
        status: ExecStatus::Reverted(reason),
        gas_used,
        return_data: Vec::new(),
        events: Vec::new(),
        deployed_contracts: Vec::new(),
    }
}

/// The host the VM talks to while a frame runs.
struct FrameHost<'h, 'e, R, V> {
    executor: &'h CallExecutor<'e, R, V>,
    frame: &'h ExecutionFrame,
    ctx: &'h mut TxContext,
    events: Vec<FrameEvent>,
}

impl<R: StateReader, V: ContractVm> VmHost for FrameHost<'_, '_, R, V> {
    fn charge_gas(&mut self, amount: u64) -> Result<(), HostAbort> {
        self.ctx.gas.charge(amount)
    }

    fn storage_read(
        &mut self,
        pointer: &StoragePointer,
    ) -> Result<Option<StorageValue>, HostAbort> {
        self.ctx.gas.charge(GAS_STORAGE_READ)?;

        let contract = &self.frame.contract_address;
        if let Some(value) = self.ctx.overlay.get(contract, pointer) {
            return Ok(Some(value));
        }
        if let Some(value) = self.frame.preload_storage.get(pointer) {
            return Ok(Some(*value));
        }
        self.executor
            .reader
            .pointer(contract, pointer)
            .map_err(|e| HostAbort::Fatal(e.to_string()))
    }

    fn storage_write(
        &mut self,
        pointer: &StoragePointer,
        value: StorageValue,
    ) -> Result<(), HostAbort> {
        self.ctx.gas.charge(GAS_STORAGE_WRITE)?;

        let contract = self.frame.contract_address;
        let is_new = !self.ctx.overlay.contains(&contract, pointer)
            && !self.frame.preload_storage.contains_key(pointer)
            && self
                .executor
                .reader
                .pointer(&contract, pointer)
                .map_err(|e| HostAbort::Fatal(e.to_string()))?
                .is_none();
        if is_new {
            self.ctx
                .gas
                .charge(self.executor.limits.storage_cost_per_byte * 32)?;
        }

        self.ctx.overlay.write(contract, *pointer, value);
        Ok(())
    }

    fn emit_event(&mut self, event_type: &str, data: &[u8]) -> Result<(), HostAbort> {
        if data.len() > self.executor.limits.max_event_len {
            return Err(HostAbort::ReceiptTooLarge);
        }
        self.ctx
            .gas
            .charge(GAS_EVENT_BASE + GAS_EVENT_PER_BYTE * data.len() as u64)?;
        self.events.push(FrameEvent {
            contract: self.frame.contract_address,
            event_type: event_type.to_string(),
            data: data.to_vec(),
        });
        Ok(())
    }

    fn external_call(
        &mut self,
        target: &ContractAddress,
        calldata: &[u8],
    ) -> Result<CallOutcome, HostAbort> {
        let child = self.frame.child_call(*target, calldata.to_vec());
        let result = self
            .executor
            .execute(&child, self.ctx)
            .map_err(|e| HostAbort::Fatal(e.to_string()))?;

        // A completed child contributes its events; a reverted child's
        // effects are already rolled back, only its gas remains spent.
        let success = result.status.is_completed();
        if success {
            self.events.extend(result.events);
        }
        Ok(CallOutcome {
            success,
            return_data: result.return_data,
        })
    }

    fn deploy(&mut self, bytecode: &[u8], seed: &Buf32) -> Result<CallOutcome, HostAbort> {
        let address = derive_subdeploy_address(&self.frame.contract_address, seed);

        let exists = self
            .executor
            .contract_exists(&address, self.ctx)
            .map_err(|e| HostAbort::Fatal(e.to_string()))?;
        if exists {
            return Ok(CallOutcome {
                success: false,
                return_data: Vec::new(),
            });
        }

        // Register before running the constructor so the new contract can
        // already be called (and can see itself) during construction.
        let before = self.ctx.deployed.len();
        self.ctx.deployed.push(NewContract {
            address,
            bytecode: bytecode.to_vec(),
            deployed_at_block: self.frame.block_height,
        });

        let child = self.frame.child_deploy(address, Vec::new());
        let result = self
            .executor
            .execute(&child, self.ctx)
            .map_err(|e| HostAbort::Fatal(e.to_string()))?;

        let success = result.status.is_completed();
        if success {
            self.events.extend(result.events);
        } else {
            self.ctx.deployed.truncate(before);
        }
        Ok(CallOutcome {
            success,
            return_data: address.as_bytes().to_vec(),
        })
    }
}
