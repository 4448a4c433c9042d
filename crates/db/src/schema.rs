//! Tree names and key layouts.
//!
//! Composite keys are fixed-width big-endian concatenations so that sled's
//! lexicographic ordering doubles as height ordering; every range scan in
//! the store relies on this.

use borsh::{BorshDeserialize, BorshSerialize};
use opnet_primitives::{ContractAddress, OpTxId, StoragePointer};

use crate::errors::{DbError, DbResult};

pub(crate) const TREE_META: &str = "meta";
pub(crate) const TREE_HEADERS: &str = "headers";
pub(crate) const TREE_POINTERS: &str = "pointers";
pub(crate) const TREE_POINTER_HEIGHT_IDX: &str = "pointers_by_height";
pub(crate) const TREE_CONTRACTS: &str = "contracts";
pub(crate) const TREE_CONTRACT_HEIGHT_IDX: &str = "contracts_by_height";
pub(crate) const TREE_UTXOS: &str = "utxos";
pub(crate) const TREE_UTXO_CREATED_IDX: &str = "utxos_created_by_height";
pub(crate) const TREE_UTXO_SPENT_IDX: &str = "utxos_spent_by_height";
pub(crate) const TREE_TXS: &str = "transactions";
pub(crate) const TREE_TX_HEIGHT_IDX: &str = "transactions_by_height";
pub(crate) const TREE_RECEIPTS: &str = "receipts";
pub(crate) const TREE_RECEIPT_TXID_IDX: &str = "receipts_by_txid";
pub(crate) const TREE_MEMPOOL: &str = "mempool";
pub(crate) const TREE_EPOCHS: &str = "epochs";

pub(crate) const META_TIP_KEY: &[u8] = b"tip";

pub(crate) fn height_key(height: u64) -> [u8; 8] {
    height.to_be_bytes()
}

/// `contract ∥ pointer ∥ last_seen_at`.
pub(crate) fn pointer_key(
    contract: &ContractAddress,
    pointer: &StoragePointer,
    last_seen_at: u64,
) -> [u8; 72] {
    let mut key = [0u8; 72];
    key[..32].copy_from_slice(contract.as_bytes());
    key[32..64].copy_from_slice(pointer.as_bytes());
    key[64..].copy_from_slice(&last_seen_at.to_be_bytes());
    key
}

/// `contract ∥ pointer` prefix for version range scans.
pub(crate) fn pointer_prefix(contract: &ContractAddress, pointer: &StoragePointer) -> [u8; 64] {
    let mut key = [0u8; 64];
    key[..32].copy_from_slice(contract.as_bytes());
    key[32..].copy_from_slice(pointer.as_bytes());
    key
}

/// `height ∥ contract ∥ pointer`, the rewind index for pointer versions.
pub(crate) fn pointer_height_idx_key(
    height: u64,
    contract: &ContractAddress,
    pointer: &StoragePointer,
) -> [u8; 72] {
    let mut key = [0u8; 72];
    key[..8].copy_from_slice(&height.to_be_bytes());
    key[8..40].copy_from_slice(contract.as_bytes());
    key[40..].copy_from_slice(pointer.as_bytes());
    key
}

/// Splits a pointer height-index key back into its parts.
pub(crate) fn split_pointer_height_idx_key(
    key: &[u8],
) -> DbResult<(u64, ContractAddress, StoragePointer)> {
    if key.len() != 72 {
        return Err(DbError::Corruption(format!(
            "pointer height index key of length {}",
            key.len()
        )));
    }
    let height = u64::from_be_bytes(key[..8].try_into().expect("length checked"));
    let contract: [u8; 32] = key[8..40].try_into().expect("length checked");
    let pointer: [u8; 32] = key[40..].try_into().expect("length checked");
    Ok((height, contract.into(), pointer.into()))
}

/// `height ∥ contract`, the rewind index for deployments.
pub(crate) fn contract_height_idx_key(height: u64, contract: &ContractAddress) -> [u8; 40] {
    let mut key = [0u8; 40];
    key[..8].copy_from_slice(&height.to_be_bytes());
    key[8..].copy_from_slice(contract.as_bytes());
    key
}

/// `txid ∥ vout`.
pub(crate) fn outpoint_key(txid: &OpTxId, vout: u32) -> [u8; 36] {
    let mut key = [0u8; 36];
    key[..32].copy_from_slice(txid.inner().as_bytes());
    key[32..].copy_from_slice(&vout.to_be_bytes());
    key
}

/// `height ∥ txid ∥ vout`, rewind index for UTXO creation and spends.
pub(crate) fn height_outpoint_key(height: u64, txid: &OpTxId, vout: u32) -> [u8; 44] {
    let mut key = [0u8; 44];
    key[..8].copy_from_slice(&height.to_be_bytes());
    key[8..40].copy_from_slice(txid.inner().as_bytes());
    key[40..].copy_from_slice(&vout.to_be_bytes());
    key
}

/// Splits a height-outpoint key back into its parts.
pub(crate) fn split_height_outpoint_key(key: &[u8]) -> DbResult<(u64, OpTxId, u32)> {
    if key.len() != 44 {
        return Err(DbError::Corruption(format!(
            "height outpoint key of length {}",
            key.len()
        )));
    }
    let height = u64::from_be_bytes(key[..8].try_into().expect("length checked"));
    let txid: [u8; 32] = key[8..40].try_into().expect("length checked");
    let vout = u32::from_be_bytes(key[40..].try_into().expect("length checked"));
    Ok((
        height,
        OpTxId::new(opnet_primitives::Buf32::new(txid)),
        vout,
    ))
}

/// `height ∥ txid`, rewind index for committed transactions.
pub(crate) fn height_txid_key(height: u64, txid: &OpTxId) -> [u8; 40] {
    let mut key = [0u8; 40];
    key[..8].copy_from_slice(&height.to_be_bytes());
    key[8..].copy_from_slice(txid.inner().as_bytes());
    key
}

/// `height ∥ index_in_block`.
pub(crate) fn receipt_key(height: u64, index_in_block: u32) -> [u8; 12] {
    let mut key = [0u8; 12];
    key[..8].copy_from_slice(&height.to_be_bytes());
    key[8..].copy_from_slice(&index_in_block.to_be_bytes());
    key
}

/// `identifier ∥ is_psbt`.
pub(crate) fn mempool_key(id: &opnet_primitives::Buf32, is_psbt: bool) -> [u8; 33] {
    let mut key = [0u8; 33];
    key[..32].copy_from_slice(id.as_bytes());
    key[32] = is_psbt as u8;
    key
}

pub(crate) fn enc<T: BorshSerialize>(value: &T) -> DbResult<Vec<u8>> {
    borsh::to_vec(value).map_err(|e| DbError::Codec(e.to_string()))
}

pub(crate) fn dec<T: BorshDeserialize>(raw: &[u8]) -> DbResult<T> {
    T::try_from_slice(raw).map_err(|e| DbError::Codec(e.to_string()))
}
