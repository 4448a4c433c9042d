use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bitcoin::{
    block::{Header, Version as BlockVersion},
    hashes::Hash,
    Block, BlockHash, CompactTarget, Network, Transaction, TxMerkleNode, Txid,
};
use opnet_btcio::{BlockFetcher, ChainInfo, L1Client, L1Error, L1Result, TipEvent};
use opnet_chainexec::test_utils::{test_pointer, test_value, TestOp, TestVm};
use opnet_db::SledNodeStorage;
use opnet_epochs::{EpochLayout, EpochManager};
use opnet_params::{
    ConsensusFeatures, ConsensusParams, ConsensusRegistry, EpochParams, NetworkLimits,
    PsbtParams, TransactionLimits,
};
use opnet_primitives::ContractAddress;
use opnet_status::StatusChannel;
use opnet_txparse::builder::{self, EnvelopeKind, EnvelopeSpec};

use super::*;
use crate::ctx::{ChainWorkerCtx, IndexerSettings};

const SEED_HEIGHT: u64 = 99;

/// In-memory chain the worker syncs against. Interior mutability lets a
/// test swap the tail out to simulate a reorg.
struct TestChain {
    start_height: u64,
    blocks: Mutex<Vec<Block>>,
}

impl TestChain {
    /// Starts with just the seed block at `start_height`.
    fn new(start_height: u64) -> Self {
        let genesis = build_block(BlockHash::all_zeros(), 1_000, vec![]);
        Self {
            start_height,
            blocks: Mutex::new(vec![genesis]),
        }
    }

    /// Appends a block and returns its height.
    fn push_block(&self, txdata: Vec<Transaction>) -> u64 {
        let mut blocks = self.blocks.lock().unwrap();
        let prev = blocks.last().unwrap().block_hash();
        let time = 1_000 + blocks.len() as u32;
        blocks.push(build_block(prev, time, txdata));
        self.start_height + blocks.len() as u64 - 1
    }

    /// Drops everything above `height` and regrows a diverging chain of
    /// `new_blocks` empty blocks (distinct timestamps, distinct hashes).
    fn fork_after(&self, height: u64, new_blocks: u64) {
        let mut blocks = self.blocks.lock().unwrap();
        let keep = (height - self.start_height + 1) as usize;
        blocks.truncate(keep);
        for i in 0..new_blocks {
            let prev = blocks.last().unwrap().block_hash();
            // Offset timestamps so the fork's hashes differ from the old
            // chain's.
            let time = 9_000 + keep as u32 + i as u32;
            blocks.push(build_block(prev, time, vec![]));
        }
    }

    fn tip_event(&self) -> TipEvent {
        let blocks = self.blocks.lock().unwrap();
        TipEvent {
            height: self.start_height + blocks.len() as u64 - 1,
            best_block: blocks.last().unwrap().block_hash().into(),
        }
    }

    fn hash_at(&self, height: u64) -> BlockHash {
        let blocks = self.blocks.lock().unwrap();
        blocks[(height - self.start_height) as usize].block_hash()
    }
}

#[async_trait]
impl L1Client for TestChain {
    async fn block_hash_at(&self, height: u64) -> L1Result<BlockHash> {
        let blocks = self.blocks.lock().unwrap();
        blocks
            .get((height - self.start_height) as usize)
            .map(|b| b.block_hash())
            .ok_or_else(|| L1Error::Transient(format!("no block at {height}")))
    }

    async fn block_at(&self, height: u64) -> L1Result<Block> {
        let blocks = self.blocks.lock().unwrap();
        blocks
            .get((height - self.start_height) as usize)
            .cloned()
            .ok_or_else(|| L1Error::Transient(format!("no block at {height}")))
    }

    async fn block_by_hash(&self, hash: &BlockHash) -> L1Result<Block> {
        let blocks = self.blocks.lock().unwrap();
        blocks
            .iter()
            .find(|b| b.block_hash() == *hash)
            .cloned()
            .ok_or_else(|| L1Error::Transient("unknown hash".to_string()))
    }

    async fn header_by_hash(&self, hash: &BlockHash) -> L1Result<Header> {
        self.block_by_hash(hash).await.map(|b| b.header)
    }

    async fn chain_info(&self) -> L1Result<ChainInfo> {
        let blocks = self.blocks.lock().unwrap();
        Ok(ChainInfo {
            blocks: self.start_height + blocks.len() as u64 - 1,
            best_block_hash: blocks.last().unwrap().block_hash(),
        })
    }

    async fn raw_transactions(&self, _txids: &[Txid]) -> L1Result<Vec<Transaction>> {
        Err(L1Error::Fatal("not used in tests".to_string()))
    }
}

fn build_block(prev: BlockHash, time: u32, txdata: Vec<Transaction>) -> Block {
    Block {
        header: Header {
            version: BlockVersion::TWO,
            prev_blockhash: prev,
            merkle_root: TxMerkleNode::all_zeros(),
            time,
            bits: CompactTarget::from_consensus(0x207fffff),
            nonce: 0,
        },
        txdata,
    }
}

fn consensus_params(name: &str, enabled_at: u64) -> ConsensusParams {
    ConsensusParams {
        name: name.to_string(),
        enabled_at_block: enabled_at,
        next_consensus: None,
        next_consensus_block: None,
        is_ready_for_next: false,
        network: NetworkLimits {
            max_tx_broadcast_size: 1_000_000,
            psbt_max_broadcast_size: 2_000_000,
        },
        psbt: PsbtParams {
            min_fee_rate_vb_per_sat: 1,
        },
        transactions: TransactionLimits {
            max_gas: 300_000_000,
            emulation_max_gas: 100_000_000,
            sat_to_gas_ratio: 1_000_000,
            max_receipt_len: 4096,
            max_event_len: 1024,
            max_deploy_depth: 2,
            max_call_depth: 10,
            storage_cost_per_byte: 100,
            max_calldata: 8192,
            max_priority_fee_sat: 100_000_000,
        },
        epoch: EpochParams {
            blocks_per_epoch: 5,
        },
        features: ConsensusFeatures::default(),
    }
}

struct Harness {
    chain: Arc<TestChain>,
    ctx: ChainWorkerCtx<TestChain, TestVm>,
    _dir: tempfile::TempDir,
}

fn make_harness(vm: TestVm, registry: ConsensusRegistry) -> Harness {
    let chain = Arc::new(TestChain::new(SEED_HEIGHT));
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SledNodeStorage::open(dir.path()).unwrap());
    let enabled_at_block = SEED_HEIGHT + 1;

    let ctx = ChainWorkerCtx::new(
        chain.clone(),
        BlockFetcher::new(chain.clone(), 5),
        store,
        Arc::new(registry),
        Arc::new(vm),
        EpochManager::new(EpochLayout::new(enabled_at_block, 5)),
        Arc::new(StatusChannel::new()),
        IndexerSettings {
            network: Network::Regtest,
            enabled_at_block,
            max_reorg_depth: 10,
            reindex_from_block: None,
            max_retries: 3,
            retry_backoff_ms: 1,
            dev_assertions: true,
        },
    );

    Harness {
        chain,
        ctx,
        _dir: dir,
    }
}

fn default_harness(vm: TestVm) -> Harness {
    make_harness(
        vm,
        ConsensusRegistry::new(vec![consensus_params("base", 0)]).unwrap(),
    )
}

/// Interaction envelope aimed at a specific contract.
fn interaction_tx(target: ContractAddress, calldata: Vec<u8>) -> Transaction {
    let mut spec = EnvelopeSpec::interaction(calldata.clone(), 10_000);
    spec.kind = EnvelopeKind::Interaction { target, calldata };
    builder::envelope_tx(&spec)
}

#[tokio::test]
async fn test_deploy_then_interact_across_blocks() {
    let deploy_spec = EnvelopeSpec::deployment(vec![0xc0, 0xde], 10_000);
    let deployed = opnet_txparse::derive_contract_address(
        &deploy_spec.sender_pubkey,
        &opnet_primitives::Buf32::new([7u8; 32]),
    );

    let vm = TestVm::new().program(deployed, vec![TestOp::Write(1, 1)]);
    let harness = default_harness(vm);

    harness
        .chain
        .push_block(vec![builder::envelope_tx(&deploy_spec)]);
    harness
        .chain
        .push_block(vec![interaction_tx(deployed, vec![1, 2, 3, 4])]);

    bootstrap(&harness.ctx).await.unwrap();
    sync_to_tip(&harness.ctx, harness.chain.tip_event())
        .await
        .unwrap();

    let store = &harness.ctx.store;
    assert_eq!(store.committed_tip().unwrap().unwrap().height(), 101);

    // The deployment landed at 100 and its constructor wrote version 100.
    let contract = store.contract(&deployed).unwrap().unwrap();
    assert_eq!(contract.deployed_at_block, 100);
    assert_eq!(contract.bytecode, vec![0xc0, 0xde]);

    let v100 = store
        .pointer_at(&deployed, &test_pointer(1), 100)
        .unwrap()
        .unwrap();
    assert_eq!(v100.last_seen_at, 100);
    assert_eq!(v100.value, test_value(1));

    // The interaction re-wrote the slot at 101.
    let v101 = store
        .pointer_at(&deployed, &test_pointer(1), 200)
        .unwrap()
        .unwrap();
    assert_eq!(v101.last_seen_at, 101);

    // Receipts are contiguous from zero per block.
    let r100 = store.receipt(100, 0).unwrap().unwrap();
    assert!(matches!(r100.status, opnet_db::ReceiptStatus::Completed));
    assert!(store.receipt(100, 1).unwrap().is_none());
    assert!(store.receipt(101, 0).unwrap().is_some());

    // Headers link and carry non-trivial roots.
    let h101 = store.header_at(101).unwrap().unwrap();
    let h100 = store.header_at(100).unwrap().unwrap();
    assert_eq!(h101.prev_blkid, h100.blkid);
    assert_ne!(h100.checksum_root, opnet_primitives::Buf32::zero());
}

#[tokio::test]
async fn test_malformed_envelope_demotes_to_generic() {
    let harness = default_harness(TestVm::new());

    let mut spec = EnvelopeSpec::interaction(vec![1, 2, 3, 4], 10_000);
    spec.sender_pubkey_hash160 = Some([0u8; 20]);
    harness.chain.push_block(vec![builder::envelope_tx(&spec)]);

    bootstrap(&harness.ctx).await.unwrap();
    sync_to_tip(&harness.ctx, harness.chain.tip_event())
        .await
        .unwrap();

    let store = &harness.ctx.store;
    // The block committed, but the transaction executed as nothing.
    assert_eq!(store.committed_tip().unwrap().unwrap().height(), 100);
    assert!(store.receipt(100, 0).unwrap().is_none());
    assert_eq!(store.header_at(100).unwrap().unwrap().n_tx, 1);
}

// Reorg scenario: tip at 101 on chain A, upstream switches to chain B
// diverging right above the seed. The worker rewinds through the stale
// blocks and re-advances along B.
#[tokio::test]
async fn test_reorg_rewinds_and_readvances() {
    let harness = default_harness(TestVm::new());

    harness.chain.push_block(vec![]);
    harness.chain.push_block(vec![]);

    bootstrap(&harness.ctx).await.unwrap();
    sync_to_tip(&harness.ctx, harness.chain.tip_event())
        .await
        .unwrap();
    let tip_a = harness.ctx.store.committed_tip().unwrap().unwrap();
    assert_eq!(tip_a.height(), 101);

    // Upstream replaces both blocks and extends one further.
    harness.chain.fork_after(SEED_HEIGHT, 3);
    sync_to_tip(&harness.ctx, harness.chain.tip_event())
        .await
        .unwrap();

    let store = &harness.ctx.store;
    let tip_b = store.committed_tip().unwrap().unwrap();
    assert_eq!(tip_b.height(), 102);
    assert_ne!(tip_b.blkid(), tip_a.blkid());

    // The rewound heights now carry the new chain's headers.
    for height in [100u64, 101, 102] {
        let header = store.header_at(height).unwrap().unwrap();
        assert_eq!(
            header.blkid,
            harness.chain.hash_at(height).into(),
            "height {height}"
        );
    }
}

#[tokio::test]
async fn test_reorg_deeper_than_bound_is_fatal() {
    let mut harness = default_harness(TestVm::new());
    harness.ctx.settings.max_reorg_depth = 1;

    harness.chain.push_block(vec![]);
    harness.chain.push_block(vec![]);
    harness.chain.push_block(vec![]);

    bootstrap(&harness.ctx).await.unwrap();
    sync_to_tip(&harness.ctx, harness.chain.tip_event())
        .await
        .unwrap();

    // Fork three blocks deep, beyond the depth bound of one.
    harness.chain.fork_after(SEED_HEIGHT, 4);
    let err = sync_to_tip(&harness.ctx, harness.chain.tip_event())
        .await
        .unwrap_err();

    assert!(matches!(err, WorkerError::ReorgTooDeep { .. }));
    assert!(err.is_fatal());
}

// Lockdown scenario: the active consensus schedules a successor at 101
// without being ready. Height 100 processes, height 101 refuses.
#[tokio::test]
async fn test_consensus_lockdown_at_boundary() {
    let mut params = consensus_params("base", 0);
    params.next_consensus = Some("next".to_string());
    params.next_consensus_block = Some(101);
    params.is_ready_for_next = false;
    let harness = make_harness(TestVm::new(), ConsensusRegistry::new(vec![params]).unwrap());

    harness.chain.push_block(vec![]);
    harness.chain.push_block(vec![]);

    bootstrap(&harness.ctx).await.unwrap();
    let err = sync_to_tip(&harness.ctx, harness.chain.tip_event())
        .await
        .unwrap_err();

    assert!(matches!(err, WorkerError::Consensus(_)));
    assert!(err.is_fatal());
    // Height 100 committed, 101 refused.
    assert_eq!(
        harness.ctx.store.committed_tip().unwrap().unwrap().height(),
        100
    );

    // The node stays locked: retrying changes nothing.
    let err = sync_to_tip(&harness.ctx, harness.chain.tip_event())
        .await
        .unwrap_err();
    assert!(matches!(err, WorkerError::Consensus(_)));
}

#[tokio::test]
async fn test_epochs_finalize_with_blocks() {
    let harness = default_harness(TestVm::new());

    // Epoch 0 spans 100..=104; finalization rides block 105.
    for _ in 0..6 {
        harness.chain.push_block(vec![]);
    }

    bootstrap(&harness.ctx).await.unwrap();
    sync_to_tip(&harness.ctx, harness.chain.tip_event())
        .await
        .unwrap();

    let epoch0 = harness.ctx.store.epoch(0).unwrap().unwrap();
    assert_eq!(epoch0.start_block, 100);
    assert_eq!(epoch0.end_block, 104);
    assert!(harness.ctx.store.epoch(1).unwrap().is_none());
}

// Replaying identical inputs through a fresh store reproduces every
// derived root bit for bit.
#[tokio::test]
async fn test_replay_is_deterministic() {
    let deploy_spec = EnvelopeSpec::deployment(vec![0xc0, 0xde], 10_000);
    let deployed = opnet_txparse::derive_contract_address(
        &deploy_spec.sender_pubkey,
        &opnet_primitives::Buf32::new([7u8; 32]),
    );

    let mut roots = Vec::new();
    for _run in 0..2 {
        let vm = TestVm::new().program(
            deployed,
            vec![TestOp::Write(1, 1), TestOp::Emit("Ping", 8)],
        );
        let harness = default_harness(vm);
        harness
            .chain
            .push_block(vec![builder::envelope_tx(&deploy_spec)]);
        harness
            .chain
            .push_block(vec![interaction_tx(deployed, vec![9, 9, 9, 9])]);

        bootstrap(&harness.ctx).await.unwrap();
        sync_to_tip(&harness.ctx, harness.chain.tip_event())
            .await
            .unwrap();

        let run_roots: Vec<_> = [100u64, 101]
            .iter()
            .map(|h| {
                let header = harness.ctx.store.header_at(*h).unwrap().unwrap();
                (header.storage_root, header.receipt_root, header.checksum_root)
            })
            .collect();
        roots.push(run_roots);
    }

    assert_eq!(roots[0], roots[1]);
}

#[tokio::test]
async fn test_simulation_reads_state_without_writing() {
    let deploy_spec = EnvelopeSpec::deployment(vec![0xc0, 0xde], 10_000);
    let deployed = opnet_txparse::derive_contract_address(
        &deploy_spec.sender_pubkey,
        &opnet_primitives::Buf32::new([7u8; 32]),
    );

    // Constructor stores 5; calls return the stored value.
    let vm = TestVm::new().program(
        deployed,
        vec![TestOp::Write(1, 5), TestOp::ReturnStorage(1)],
    );
    let harness = default_harness(vm);
    harness
        .chain
        .push_block(vec![builder::envelope_tx(&deploy_spec)]);

    bootstrap(&harness.ctx).await.unwrap();
    sync_to_tip(&harness.ctx, harness.chain.tip_event())
        .await
        .unwrap();

    let consensus = harness.ctx.consensus.active_at(100).unwrap();
    let result = crate::exec::simulate_call(
        &harness.ctx.store,
        consensus,
        harness.ctx.vm.as_ref(),
        deployed,
        vec![1, 2, 3, 4],
        opnet_primitives::Buf32::new([0xaa; 32]),
    )
    .unwrap();

    assert!(result.status.is_completed());
    assert_eq!(result.return_data, test_value(5).as_bytes().to_vec());

    // Nothing moved: same tip, same single pointer version, and the
    // writer slot is free again.
    let store = &harness.ctx.store;
    assert_eq!(store.committed_tip().unwrap().unwrap().height(), 100);
    let entry = store
        .pointer_at(&deployed, &test_pointer(1), 200)
        .unwrap()
        .unwrap();
    assert_eq!(entry.last_seen_at, 100);
    assert!(store.open_snapshot(101).is_ok());
}

#[tokio::test]
async fn test_access_list_preloads_declared_slots() {
    let deploy_spec = EnvelopeSpec::deployment(vec![0xc0, 0xde], 10_000);
    let deployed = opnet_txparse::derive_contract_address(
        &deploy_spec.sender_pubkey,
        &opnet_primitives::Buf32::new([7u8; 32]),
    );

    // Constructor seeds slot 1 with 5; the later call echoes whatever it
    // reads back, exercising the preload path end to end.
    let vm = TestVm::new().program(
        deployed,
        vec![TestOp::Write(1, 5), TestOp::ReturnStorage(1)],
    );
    let harness = default_harness(vm);
    harness
        .chain
        .push_block(vec![builder::envelope_tx(&deploy_spec)]);

    let mut spec = EnvelopeSpec::interaction(vec![1, 2, 3, 4], 10_000);
    spec.kind = EnvelopeKind::Interaction {
        target: deployed,
        calldata: vec![1, 2, 3, 4],
    };
    spec.access_list = Some(vec![(deployed, test_pointer(1))]);
    harness.chain.push_block(vec![builder::envelope_tx(&spec)]);

    bootstrap(&harness.ctx).await.unwrap();
    sync_to_tip(&harness.ctx, harness.chain.tip_event())
        .await
        .unwrap();

    let receipt = harness.ctx.store.receipt(101, 0).unwrap().unwrap();
    assert!(matches!(receipt.status, opnet_db::ReceiptStatus::Completed));
    assert_eq!(receipt.return_data, test_value(5).as_bytes().to_vec());
}

#[tokio::test]
async fn test_transient_fetch_failure_is_retried() {
    let harness = default_harness(TestVm::new());
    harness.chain.push_block(vec![]);

    bootstrap(&harness.ctx).await.unwrap();

    // Report a tip one past what the chain can serve: the fetch fails
    // transiently and the retry budget runs out without turning fatal.
    let mut event = harness.chain.tip_event();
    event.height += 1;
    let err = sync_to_tip(&harness.ctx, event).await.unwrap_err();
    assert!(matches!(err, WorkerError::RetriesExhausted(_)));
    assert!(!err.is_fatal());

    // The real tip still syncs fine afterwards.
    sync_to_tip(&harness.ctx, harness.chain.tip_event())
        .await
        .unwrap();
    assert_eq!(
        harness.ctx.store.committed_tip().unwrap().unwrap().height(),
        100
    );
}
