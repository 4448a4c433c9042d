use borsh::{BorshDeserialize, BorshSerialize};
use opnet_primitives::{
    Buf32, ContractAddress, L1BlockId, OpTxId, ScriptKind, StoragePointer, StorageValue,
};

/// A committed block header with the derived roots computed over the
/// block's sorted execution trace. Immutable once committed.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct HeaderRecord {
    pub blkid: L1BlockId,
    pub height: u64,
    pub prev_blkid: L1BlockId,
    pub merkle_root: Buf32,
    pub time: u32,
    pub median_time: u32,
    pub n_tx: u32,
    pub weight: u64,
    pub bits: u32,
    pub nonce: u32,
    /// Integer part of the upstream difficulty. Persisted paths carry no
    /// floats.
    pub difficulty: u128,
    pub version: i32,

    pub receipt_root: Buf32,
    pub storage_root: Buf32,
    pub checksum_root: Buf32,
}

/// One versioned storage slot row. The version is the height the value
/// was last written at.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct StorageEntry {
    pub contract: ContractAddress,
    pub pointer: StoragePointer,
    pub value: StorageValue,
    pub proofs: Vec<String>,
    pub last_seen_at: u64,
}

/// A deployed contract. Never mutated after deployment.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ContractRecord {
    pub address: ContractAddress,
    pub bytecode: Vec<u8>,
    pub deployer_pubkey: [u8; 33],
    pub contract_seed: Buf32,
    pub deployed_at_block: u64,
    pub tweaked_public_key: [u8; 33],
    pub hybrid_public_key: Option<Vec<u8>>,
}

/// A tracked unspent (or spent-at-height) transaction output.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct UtxoRecord {
    pub txid: OpTxId,
    pub vout: u32,
    pub value_sat: u64,
    pub script_kind: ScriptKind,
    pub script: Vec<u8>,
    pub block_height: u64,
    pub spent_at: Option<u64>,
}

/// Parser classification of a committed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum TxKind {
    Generic,
    Interaction,
    Deployment,
}

/// A committed transaction's index row.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TxRecord {
    pub txid: OpTxId,
    pub block_height: u64,
    pub index_in_block: u32,
    pub kind: TxKind,
    pub priority_fee_sat: u64,
    pub gas_sat_fee: u64,
}

/// Outcome recorded for one executed transaction. A revert is a normal
/// contract outcome, not a block failure.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum ReceiptStatus {
    Completed,
    Reverted { reason: String },
}

/// One event emitted during execution.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct EventRecord {
    pub contract: ContractAddress,
    pub event_type: String,
    pub data: Vec<u8>,
}

/// The execution receipt for `(block_height, index_in_block)`.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ReceiptRecord {
    pub txid: OpTxId,
    pub block_height: u64,
    pub index_in_block: u32,
    pub status: ReceiptStatus,
    pub gas_used: u64,
    pub return_data: Vec<u8>,
    pub events: Vec<EventRecord>,
}

/// A persisted mempool entry, keyed by `(identifier, is_psbt)`.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct MempoolRow {
    pub id: Buf32,
    pub is_psbt: bool,
    pub raw: Vec<u8>,
    pub previous_psbt_id: Option<Buf32>,
    pub first_seen: u64,
    pub expires_at_height: Option<u64>,
}

/// On-disk value half of a pointer row; the key carries
/// `(contract, pointer, last_seen_at)`.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub(crate) struct PointerRow {
    pub value: StorageValue,
    pub proofs: Vec<String>,
}

/// A finalized epoch window.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct EpochRecord {
    pub epoch_number: u64,
    pub start_block: u64,
    pub end_block: u64,
    pub target_hash: Buf32,
    pub epoch_root: Buf32,
    pub epoch_hash: Buf32,
    pub proposer: Buf32,
    pub proofs: Vec<Vec<u8>>,
}
