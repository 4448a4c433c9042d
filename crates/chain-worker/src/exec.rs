use std::collections::{HashMap, HashSet};

use bitcoin::Block;
use opnet_chainexec::{
    CallExecutor, ContractDef, ContractVm, EngineError, ExecStatus, ExecutionFrame,
    ExecutionResult, FrameInput, FrameOutput, NewContract, StateReader, TxContext,
};
use opnet_db::{
    BlockSnapshot, ContractRecord, EventRecord, HeaderRecord, PointerWrite, ReceiptRecord,
    ReceiptStatus, TxKind, TxRecord, UtxoRecord,
};
use opnet_ordering::{indexing_hash, sort_block, SortableTx};
use opnet_params::ConsensusParams;
use opnet_primitives::{
    merkle_root, sha256, sha256_concat, Buf32, ContractAddress, L1BlockId, OpTxId,
    StoragePointer, StorageValue,
};
use opnet_txparse::{classify_script, classify_transaction, ParsedTx, TxPayload};
use tracing::{debug, warn};

use crate::error::WorkerResult;

/// Derived roots and counters for a fully executed block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockOutcome {
    pub n_contract_txs: u32,
    pub receipt_root: Buf32,
    pub storage_root: Buf32,
    pub checksum_root: Buf32,
    /// Epoch-submission candidate carried by this block, if any:
    /// `(proposer digest, proofs)`.
    pub epoch_submission: Option<(Buf32, Vec<Vec<u8>>)>,
}

/// Snapshot-plus-block-deltas state view for one transaction's frames.
struct BlockStateView<'a, 's> {
    snap: &'a BlockSnapshot<'s>,
    deltas: &'a HashMap<(ContractAddress, StoragePointer), StorageValue>,
}

impl StateReader for BlockStateView<'_, '_> {
    fn pointer(
        &self,
        contract: &ContractAddress,
        pointer: &StoragePointer,
    ) -> Result<Option<StorageValue>, EngineError> {
        if let Some(value) = self.deltas.get(&(*contract, *pointer)) {
            return Ok(Some(*value));
        }
        self.snap
            .pointer_at(contract, pointer)
            .map(|entry| entry.map(|e| e.value))
            .map_err(|e| EngineError::State(e.to_string()))
    }

    fn contract(&self, address: &ContractAddress) -> Result<Option<ContractDef>, EngineError> {
        self.snap
            .contract(address)
            .map(|record| {
                record.map(|r| ContractDef {
                    address: r.address,
                    bytecode: r.bytecode,
                })
            })
            .map_err(|e| EngineError::State(e.to_string()))
    }
}

/// Parses, orders and executes a block's contract transactions into the
/// open snapshot. Returns the derived roots for the header.
pub(crate) fn execute_block_into_snapshot<V: ContractVm>(
    block: &Block,
    height: u64,
    median_time: u64,
    snap: &mut BlockSnapshot<'_>,
    consensus: &ConsensusParams,
    vm: &V,
) -> WorkerResult<BlockOutcome> {
    let blkid = L1BlockId::from(block.block_hash());

    // Parse phase. A malformed envelope demotes the transaction to
    // generic; it never fails the block.
    let mut parsed: Vec<ParsedTx> = Vec::with_capacity(block.txdata.len());
    for tx in &block.txdata {
        match classify_transaction(tx, &consensus.transactions) {
            Ok(p) => parsed.push(p),
            Err(error) => {
                let txid = OpTxId::from(tx.compute_txid());
                warn!(%txid, %error, "demoting malformed envelope to generic");
                parsed.push(ParsedTx {
                    txid,
                    payload: TxPayload::Generic,
                });
            }
        }
    }

    // Contract transactions only, with their base-chain transaction.
    let contract_txs: HashMap<OpTxId, (&bitcoin::Transaction, &ParsedTx)> = block
        .txdata
        .iter()
        .zip(parsed.iter())
        .filter(|(_, p)| !p.payload.is_generic())
        .map(|(tx, p)| (p.txid, (tx, p)))
        .collect();

    // Sort phase: in-block dependency edges from consumed outpoints.
    let opnet_ids: HashSet<OpTxId> = contract_txs.keys().copied().collect();
    let sortables: Vec<SortableTx> = block
        .txdata
        .iter()
        .zip(parsed.iter())
        .filter(|(_, p)| !p.payload.is_generic())
        .map(|(tx, p)| {
            let mut parents: Vec<OpTxId> = tx
                .input
                .iter()
                .map(|i| OpTxId::from(i.previous_output.txid))
                .filter(|parent| *parent != p.txid && opnet_ids.contains(parent))
                .collect();
            parents.sort();
            parents.dedup();
            SortableTx {
                txid: p.txid,
                priority_fee_sat: p.payload.priority_fee_sat(),
                indexing_hash: indexing_hash(&p.txid, &blkid),
                parents,
            }
        })
        .collect();

    let order = sort_block(&sortables)?;

    // Execute phase, in canonical order.
    let mut block_deltas: HashMap<(ContractAddress, StoragePointer), StorageValue> =
        HashMap::new();
    let mut receipts: Vec<ReceiptRecord> = Vec::with_capacity(order.len());
    let mut tx_rows: Vec<TxRecord> = Vec::with_capacity(order.len());
    let mut new_utxos: Vec<UtxoRecord> = Vec::new();
    let mut spends: Vec<(OpTxId, u32)> = Vec::new();

    for (index, txid) in order.iter().enumerate() {
        let (tx, p) = contract_txs[txid];
        let index_in_block = index as u32;

        let gas_sat_fee = tx.output.first().map(|o| o.value.to_sat()).unwrap_or(0);
        let max_gas = consensus
            .transactions
            .max_gas
            .min(gas_sat_fee.saturating_mul(consensus.transactions.sat_to_gas_ratio));

        let result = execute_one(
            tx, p, height, median_time, max_gas, snap, &block_deltas, consensus, vm,
        )?;

        // Promotion: only a completed top-level frame lands its deltas
        // and deployments.
        if result.status.is_completed() {
            for ((contract, pointer), value) in result.deltas {
                block_deltas.insert((contract, pointer), value);
            }
            for new in result.deployed {
                stage_deployment(snap, p, &new)?;
            }
        }

        // Track the transaction's UTXO footprint either way; the
        // base-chain effects are real even when the contract reverted.
        for input in &tx.input {
            spends.push((
                OpTxId::from(input.previous_output.txid),
                input.previous_output.vout,
            ));
        }
        for (vout, output) in tx.output.iter().enumerate() {
            new_utxos.push(UtxoRecord {
                txid: *txid,
                vout: vout as u32,
                value_sat: output.value.to_sat(),
                script_kind: classify_script(&output.script_pubkey),
                script: output.script_pubkey.to_bytes(),
                block_height: height,
                spent_at: None,
            });
        }

        let (status, gas_used, return_data, events) = result.receipt_parts;
        receipts.push(ReceiptRecord {
            txid: *txid,
            block_height: height,
            index_in_block,
            status,
            gas_used,
            return_data,
            events,
        });
        tx_rows.push(TxRecord {
            txid: *txid,
            block_height: height,
            index_in_block,
            kind: match &p.payload {
                TxPayload::Interaction(_) => TxKind::Interaction,
                TxPayload::Deployment(_) => TxKind::Deployment,
                TxPayload::Generic => TxKind::Generic,
            },
            priority_fee_sat: p.payload.priority_fee_sat(),
            gas_sat_fee,
        });
    }

    // Stage phase: one pointer batch for the whole block keeps the
    // one-version-per-height invariant.
    let pointer_batch: Vec<PointerWrite> = {
        let mut entries: Vec<_> = block_deltas.iter().collect();
        entries.sort_by_key(|((c, p), _)| (*c, *p));
        entries
            .into_iter()
            .map(|((contract, pointer), value)| PointerWrite {
                contract: *contract,
                pointer: *pointer,
                value: *value,
                proofs: Vec::new(),
                last_seen_at: height,
            })
            .collect()
    };

    let storage_leaves: Vec<Buf32> = pointer_batch
        .iter()
        .map(|w| {
            let mut preimage = Vec::with_capacity(96);
            preimage.extend_from_slice(w.contract.as_bytes());
            preimage.extend_from_slice(w.pointer.as_bytes());
            preimage.extend_from_slice(w.value.as_bytes());
            sha256(&preimage)
        })
        .collect();
    let receipt_leaves: Vec<Buf32> = receipts.iter().map(receipt_leaf).collect();

    let receipt_root = merkle_root(&receipt_leaves);
    let storage_root = merkle_root(&storage_leaves);
    let checksum_root = sha256_concat(receipt_root.as_ref(), storage_root.as_ref());

    // First epoch-submission envelope in canonical order, if any.
    let epoch_submission = order.iter().find_map(|txid| {
        let (_, p) = contract_txs[txid];
        match &p.payload {
            TxPayload::Interaction(i) if i.feature_flags.epoch_submission() => {
                Some((sha256(&i.sender_pubkey), vec![i.solution.clone()]))
            }
            TxPayload::Deployment(d) if d.feature_flags.epoch_submission() => {
                Some((sha256(&d.sender_pubkey), vec![d.solution.clone()]))
            }
            _ => None,
        }
    });

    snap.put_pointers(pointer_batch)?;
    for (txid, vout) in spends {
        snap.mark_spent(txid, vout);
    }
    snap.put_utxos(new_utxos);
    let n_contract_txs = receipts.len() as u32;
    snap.put_receipts(receipts);
    snap.put_transactions(tx_rows);

    debug!(%height, %n_contract_txs, "block executed");
    Ok(BlockOutcome {
        n_contract_txs,
        receipt_root,
        storage_root,
        checksum_root,
        epoch_submission,
    })
}

/// Per-transaction execution product, flattened for the caller.
struct TxOutcome {
    status: ExecStatus,
    deltas: HashMap<(ContractAddress, StoragePointer), StorageValue>,
    deployed: Vec<NewContract>,
    receipt_parts: (ReceiptStatus, u64, Vec<u8>, Vec<EventRecord>),
}

impl TxOutcome {
    fn from_result(result: ExecutionResult, deltas_map: HashMap<(ContractAddress, StoragePointer), StorageValue>) -> Self {
        let status_record = match &result.status {
            ExecStatus::Completed => ReceiptStatus::Completed,
            ExecStatus::Reverted(reason) => ReceiptStatus::Reverted {
                reason: reason.to_string(),
            },
        };
        let events = result
            .events
            .iter()
            .map(|e| EventRecord {
                contract: e.contract,
                event_type: e.event_type.clone(),
                data: e.data.clone(),
            })
            .collect();
        Self {
            receipt_parts: (status_record, result.gas_used, result.return_data, events),
            deployed: result.deployed_contracts,
            deltas: deltas_map,
            status: result.status,
        }
    }
}

#[allow(clippy::too_many_arguments, reason = "single private call site")]
fn execute_one<V: ContractVm>(
    tx: &bitcoin::Transaction,
    parsed: &ParsedTx,
    height: u64,
    median_time: u64,
    max_gas: u64,
    snap: &BlockSnapshot<'_>,
    block_deltas: &HashMap<(ContractAddress, StoragePointer), StorageValue>,
    consensus: &ConsensusParams,
    vm: &V,
) -> WorkerResult<TxOutcome> {
    let view = BlockStateView {
        snap,
        deltas: block_deltas,
    };
    let executor = CallExecutor::new(&view, vm, &consensus.transactions);
    let mut ctx = TxContext::new(max_gas);

    let inputs: Vec<FrameInput> = tx
        .input
        .iter()
        .map(|i| FrameInput {
            txid: *OpTxId::from(i.previous_output.txid).inner(),
            vout: i.previous_output.vout,
        })
        .collect();
    let outputs: Vec<FrameOutput> = tx
        .output
        .iter()
        .map(|o| FrameOutput {
            value_sat: o.value.to_sat(),
            script: o.script_pubkey.to_bytes(),
        })
        .collect();

    let result = match &parsed.payload {
        TxPayload::Interaction(call) => {
            let origin = sha256(&call.sender_pubkey);

            // Warm the declared slots so execution reads them without
            // per-slot snapshot trips.
            let mut preload_storage = HashMap::new();
            if let Some(list) = &call.access_list {
                for (contract, pointer) in list {
                    if *contract != call.target {
                        continue;
                    }
                    if let Some(value) = view.pointer(contract, pointer)? {
                        preload_storage.insert(*pointer, value);
                    }
                }
            }

            let frame = ExecutionFrame {
                contract_address: call.target,
                calldata: call.calldata.clone(),
                tx_origin: origin,
                msg_sender: origin,
                block_height: height,
                block_median_time: median_time,
                call_depth: 0,
                deploy_depth: 0,
                is_constructor: false,
                inputs,
                outputs,
                preload_storage,
                access_list: call.access_list.clone(),
            };
            executor.execute(&frame, &mut ctx)?
        }
        TxPayload::Deployment(deploy) => {
            let address = deploy.contract_address();
            let origin = sha256(&deploy.sender_pubkey);

            // Redeployment of an existing address is a revert, not a
            // block failure.
            if view.contract(&address)?.is_some() {
                let result = ExecutionResult {
                    status: ExecStatus::Reverted(
                        opnet_chainexec::RevertReason::ContractTrap(format!(
                            "contract {address} already deployed"
                        )),
                    ),
                    gas_used: 0,
                    return_data: Vec::new(),
                    events: Vec::new(),
                    deployed_contracts: Vec::new(),
                };
                return Ok(TxOutcome::from_result(result, HashMap::new()));
            }

            // Pre-register so the constructor can resolve (and call into)
            // its own bytecode; a reverted constructor takes the pending
            // deployment down with it.
            ctx.deployed.push(NewContract {
                address,
                bytecode: deploy.bytecode.clone(),
                deployed_at_block: height,
            });

            let frame = ExecutionFrame {
                contract_address: address,
                calldata: Vec::new(),
                tx_origin: origin,
                msg_sender: origin,
                block_height: height,
                block_median_time: median_time,
                call_depth: 0,
                deploy_depth: 0,
                is_constructor: true,
                inputs,
                outputs,
                preload_storage: HashMap::new(),
                access_list: None,
            };
            let mut result = executor.execute(&frame, &mut ctx)?;
            // The pre-registered deployment is part of this frame's
            // product when it completed.
            if result.status.is_completed() {
                result.deployed_contracts = ctx.deployed.clone();
            }
            result
        }
        TxPayload::Generic => unreachable!("generic transactions are filtered before execution"),
    };

    let deltas_map = std::mem::take(&mut ctx.overlay).into_deltas();
    Ok(TxOutcome::from_result(result, deltas_map))
}

/// Dry-runs a call against the committed tip.
///
/// The snapshot is terminated, never committed: gas is bounded by the
/// emulation cap and nothing the call writes survives. Used by the API
/// worker's call simulation.
pub fn simulate_call<V: ContractVm>(
    store: &opnet_db::SledNodeStorage,
    consensus: &ConsensusParams,
    vm: &V,
    target: ContractAddress,
    calldata: Vec<u8>,
    caller: Buf32,
) -> WorkerResult<ExecutionResult> {
    let tip = store.committed_tip()?.ok_or_else(|| {
        opnet_db::DbError::NotFound("simulation before genesis".to_string())
    })?;
    let tip_time = store
        .header_at(tip.height())?
        .map(|h| h.median_time as u64)
        .unwrap_or(0);

    let snap = store.open_snapshot(tip.height() + 1)?;
    let empty_deltas = HashMap::new();
    let result = {
        let view = BlockStateView {
            snap: &snap,
            deltas: &empty_deltas,
        };
        let executor = CallExecutor::new(&view, vm, &consensus.transactions);
        let mut ctx = TxContext::new(consensus.transactions.emulation_max_gas);

        let frame = ExecutionFrame {
            contract_address: target,
            calldata,
            tx_origin: caller,
            msg_sender: caller,
            block_height: tip.height() + 1,
            block_median_time: tip_time,
            call_depth: 0,
            deploy_depth: 0,
            is_constructor: false,
            inputs: Vec::new(),
            outputs: Vec::new(),
            preload_storage: HashMap::new(),
            access_list: None,
        };
        executor.execute(&frame, &mut ctx)?
    };
    snap.terminate();
    Ok(result)
}

/// Stages a deployed contract row into the snapshot.
fn stage_deployment(
    snap: &mut BlockSnapshot<'_>,
    parsed: &ParsedTx,
    new: &NewContract,
) -> WorkerResult<()> {
    let (deployer_pubkey, contract_seed, hybrid) = match &parsed.payload {
        TxPayload::Deployment(d) => (
            d.sender_pubkey,
            d.contract_seed,
            (!d.solution.is_empty()).then(|| d.solution.clone()),
        ),
        // Sub-deployments inherit the envelope sender.
        TxPayload::Interaction(i) => (i.sender_pubkey, *new.address.inner(), None),
        TxPayload::Generic => unreachable!("generic transactions do not deploy"),
    };

    snap.put_contract(ContractRecord {
        address: new.address,
        bytecode: new.bytecode.clone(),
        deployer_pubkey,
        contract_seed,
        deployed_at_block: new.deployed_at_block,
        tweaked_public_key: deployer_pubkey,
        hybrid_public_key: hybrid,
    })?;
    Ok(())
}

/// Leaf committed for one receipt in the block's receipt root.
fn receipt_leaf(receipt: &ReceiptRecord) -> Buf32 {
    let mut preimage = Vec::with_capacity(32 + 8 + 4 + 8 + 1 + 32);
    preimage.extend_from_slice(receipt.txid.inner().as_bytes());
    preimage.extend_from_slice(&receipt.block_height.to_be_bytes());
    preimage.extend_from_slice(&receipt.index_in_block.to_be_bytes());
    preimage.extend_from_slice(&receipt.gas_used.to_be_bytes());
    preimage.push(match &receipt.status {
        ReceiptStatus::Completed => 0x01,
        ReceiptStatus::Reverted { .. } => 0x00,
    });
    preimage.extend_from_slice(sha256(&receipt.return_data).as_ref());
    sha256(&preimage)
}

/// Finalized header row for a processed block.
pub(crate) fn build_header_record(
    block: &Block,
    height: u64,
    median_time: u32,
    difficulty: u128,
    outcome: &BlockOutcome,
) -> HeaderRecord {
    HeaderRecord {
        blkid: L1BlockId::from(block.block_hash()),
        height,
        prev_blkid: L1BlockId::from(block.header.prev_blockhash),
        merkle_root: Buf32::new(
            *bitcoin::hashes::Hash::as_byte_array(&block.header.merkle_root),
        ),
        time: block.header.time,
        median_time,
        n_tx: block.txdata.len() as u32,
        weight: block.weight().to_wu(),
        bits: block.header.bits.to_consensus(),
        nonce: block.header.nonce,
        difficulty,
        version: block.header.version.to_consensus(),
        receipt_root: outcome.receipt_root,
        storage_root: outcome.storage_root,
        checksum_root: outcome.checksum_root,
    }
}
