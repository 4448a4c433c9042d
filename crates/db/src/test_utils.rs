//! Shared constructors for storage tests in this and dependent crates.

use opnet_primitives::{Buf32, ContractAddress, L1BlockId, OpTxId, ScriptKind, StoragePointer};

use crate::{HeaderRecord, SledNodeStorage, UtxoRecord};

/// Opens a store in a fresh temp directory. Keep the guard alive for the
/// duration of the test.
pub fn temp_store() -> (tempfile::TempDir, SledNodeStorage) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let store = SledNodeStorage::open(dir.path()).expect("open sled store");
    (dir, store)
}

/// Deterministic block id from a single distinguishing byte.
pub fn blkid(seed: u8) -> L1BlockId {
    let mut bytes = [0u8; 32];
    bytes[0] = seed;
    L1BlockId::new(Buf32::new(bytes))
}

pub fn txid(seed: u8) -> OpTxId {
    let mut bytes = [0u8; 32];
    bytes[0] = seed;
    OpTxId::new(Buf32::new(bytes))
}

pub fn contract_addr(seed: u8) -> ContractAddress {
    let mut bytes = [0u8; 32];
    bytes[0] = seed;
    ContractAddress::from(bytes)
}

pub fn pointer(seed: u8) -> StoragePointer {
    let mut bytes = [0u8; 32];
    bytes[0] = seed;
    StoragePointer::from(bytes)
}

/// A minimal header linking `height` to the previous seed byte.
pub fn make_header(height: u64, id_seed: u8, prev_seed: u8) -> HeaderRecord {
    HeaderRecord {
        blkid: blkid(id_seed),
        height,
        prev_blkid: blkid(prev_seed),
        merkle_root: Buf32::zero(),
        time: 1_700_000_000,
        median_time: 1_700_000_000,
        n_tx: 0,
        weight: 0,
        bits: 0x207fffff,
        nonce: 0,
        difficulty: 1,
        version: 2,
        receipt_root: Buf32::zero(),
        storage_root: Buf32::zero(),
        checksum_root: Buf32::zero(),
    }
}

pub fn make_utxo(tx_seed: u8, vout: u32, value_sat: u64, block_height: u64) -> UtxoRecord {
    UtxoRecord {
        txid: txid(tx_seed),
        vout,
        value_sat,
        script_kind: ScriptKind::P2tr,
        script: vec![0x51],
        block_height,
        spent_at: None,
    }
}

/// Seeds genesis at `height` and commits empty blocks up to and including
/// `to_height`, returning with the tip at `to_height`.
pub fn advance_empty_to(store: &SledNodeStorage, genesis_height: u64, to_height: u64) {
    store
        .init_genesis(&make_header(genesis_height, genesis_height as u8, 0))
        .expect("seed genesis");
    for h in (genesis_height + 1)..=to_height {
        let mut snap = store.open_snapshot(h).expect("open snapshot");
        snap.put_header(make_header(h, h as u8, (h - 1) as u8))
            .expect("stage header");
        snap.commit().expect("commit");
    }
}
