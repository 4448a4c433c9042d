use opnet_db::{
    DbError, EpochRecord, EventRecord, HeaderRecord, MempoolRow, PointerWrite, ReceiptRecord,
    ReceiptStatus, SledNodeStorage, TxKind, TxRecord, UtxoRecord,
};
use opnet_primitives::{
    Buf32, ContractAddress, L1BlockId, OpTxId, ScriptKind, StoragePointer, StorageValue,
};

fn temp_store() -> (tempfile::TempDir, SledNodeStorage) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let store = SledNodeStorage::open(dir.path()).expect("open sled store");
    (dir, store)
}

fn blkid(seed: u8) -> L1BlockId {
    let mut bytes = [0u8; 32];
    bytes[0] = seed;
    L1BlockId::new(Buf32::new(bytes))
}

fn txid(seed: u8) -> OpTxId {
    let mut bytes = [0u8; 32];
    bytes[0] = seed;
    OpTxId::new(Buf32::new(bytes))
}

fn contract(seed: u8) -> ContractAddress {
    let mut bytes = [0u8; 32];
    bytes[0] = seed;
    ContractAddress::from(bytes)
}

fn pointer(seed: u8) -> StoragePointer {
    let mut bytes = [0u8; 32];
    bytes[0] = seed;
    StoragePointer::from(bytes)
}

fn value(seed: u8) -> StorageValue {
    let mut bytes = [0u8; 32];
    bytes[0] = seed;
    StorageValue::from(bytes)
}

fn make_header(height: u64, id_seed: u8, prev_seed: u8) -> HeaderRecord {
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

fn pointer_write(c: u8, p: u8, v: u8, height: u64) -> PointerWrite {
    PointerWrite {
        contract: contract(c),
        pointer: pointer(p),
        value: value(v),
        proofs: vec![],
        last_seen_at: height,
    }
}

/// Seeds genesis and commits empty blocks so the tip lands on `to_height`.
fn advance_empty_to(store: &SledNodeStorage, genesis_height: u64, to_height: u64) {
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

#[test]
fn test_genesis_seed_is_idempotent() {
    let (_dir, store) = temp_store();

    store.init_genesis(&make_header(99, 99, 0)).unwrap();
    // Second seed with a different header must not overwrite.
    store.init_genesis(&make_header(50, 50, 0)).unwrap();

    let tip = store.committed_tip().unwrap().unwrap();
    assert_eq!(tip.height(), 99);
}

#[test]
fn test_snapshot_requires_committed_parent() {
    let (_dir, store) = temp_store();
    advance_empty_to(&store, 99, 100);

    let err = store.open_snapshot(102).unwrap_err();
    assert!(matches!(
        err,
        DbError::PreconditionViolation { requested: 102, .. }
    ));

    // Re-opening the already committed height is also a violation.
    assert!(store.open_snapshot(100).is_err());
    assert!(store.open_snapshot(101).is_ok());
}

#[test]
fn test_single_writer_conflict() {
    let (_dir, store) = temp_store();
    advance_empty_to(&store, 99, 100);

    let _snap = store.open_snapshot(101).unwrap();
    let err = store.open_snapshot(101).unwrap_err();
    assert!(matches!(err, DbError::Conflict(_)));
}

#[test]
fn test_dropped_snapshot_releases_writer() {
    let (_dir, store) = temp_store();
    advance_empty_to(&store, 99, 100);

    {
        let _snap = store.open_snapshot(101).unwrap();
    }
    assert!(store.open_snapshot(101).is_ok());
}

#[test]
fn test_revert_discards_writes() {
    let (_dir, store) = temp_store();
    advance_empty_to(&store, 99, 100);

    let mut snap = store.open_snapshot(101).unwrap();
    snap.put_pointers(vec![pointer_write(1, 1, 7, 101)]).unwrap();
    snap.revert();

    assert!(store
        .pointer_at(&contract(1), &pointer(1), 101)
        .unwrap()
        .is_none());
    // Tip untouched.
    assert_eq!(store.committed_tip().unwrap().unwrap().height(), 100);
}

// Versioned read behavior: write v1 at height 50 and v2 at height 75, then
// probe below, between and above the two versions.
#[test]
fn test_versioned_pointer_read() {
    let (_dir, store) = temp_store();
    advance_empty_to(&store, 49, 49);

    for h in 50..=75u64 {
        let mut snap = store.open_snapshot(h).unwrap();
        snap.put_header(make_header(h, h as u8, (h - 1) as u8))
            .unwrap();
        if h == 50 {
            snap.put_pointers(vec![pointer_write(1, 1, 1, 50)]).unwrap();
        }
        if h == 75 {
            snap.put_pointers(vec![pointer_write(1, 1, 2, 75)]).unwrap();
        }
        snap.commit().unwrap();
    }

    let c = contract(1);
    let p = pointer(1);

    assert!(store.pointer_at(&c, &p, 40).unwrap().is_none());

    let at_60 = store.pointer_at(&c, &p, 60).unwrap().unwrap();
    assert_eq!(at_60.value, value(1));
    assert_eq!(at_60.last_seen_at, 50);

    let at_80 = store.pointer_at(&c, &p, 80).unwrap().unwrap();
    assert_eq!(at_80.value, value(2));
    assert_eq!(at_80.last_seen_at, 75);

    // Read exactly at the version height sees that version.
    assert_eq!(store.pointer_at(&c, &p, 75).unwrap().unwrap().value, value(2));
}

#[test]
fn test_duplicate_pointer_write_fails_whole_batch() {
    let (_dir, store) = temp_store();
    advance_empty_to(&store, 99, 100);

    let mut snap = store.open_snapshot(101).unwrap();
    let err = snap
        .put_pointers(vec![
            pointer_write(1, 1, 1, 101),
            pointer_write(1, 2, 2, 101),
            pointer_write(1, 1, 3, 101),
        ])
        .unwrap_err();
    assert!(matches!(err, DbError::DuplicatePointerWrite { height: 101, .. }));

    // Nothing from the failed batch is staged: a clean batch still works
    // for the colliding key.
    snap.put_pointers(vec![pointer_write(1, 1, 9, 101)]).unwrap();
}

#[test]
fn test_snapshot_reads_see_staged_writes() {
    let (_dir, store) = temp_store();
    advance_empty_to(&store, 99, 100);

    let mut snap = store.open_snapshot(101).unwrap();
    snap.put_pointers(vec![pointer_write(1, 1, 5, 101)]).unwrap();

    let entry = snap.pointer_at(&contract(1), &pointer(1)).unwrap().unwrap();
    assert_eq!(entry.value, value(5));
    assert_eq!(entry.last_seen_at, 101);
}

#[test]
fn test_commit_conflict_after_rewind() {
    let (_dir, store) = temp_store();
    advance_empty_to(&store, 99, 102);

    // Open at 103, then simulate a racing rewind... which is refused while
    // the snapshot holds the writer slot.
    let mut snap = store.open_snapshot(103).unwrap();
    assert!(matches!(store.rewind_to(101), Err(DbError::Conflict(_))));

    snap.put_header(make_header(103, 103, 102)).unwrap();
    snap.commit().unwrap();

    // After release the rewind goes through and a stale-height snapshot
    // can no longer be opened.
    store.rewind_to(101).unwrap();
    assert_eq!(store.committed_tip().unwrap().unwrap().height(), 101);
    assert!(store.open_snapshot(103).is_err());
}

#[test]
fn test_commit_materializes_all_stores() {
    let (_dir, store) = temp_store();
    advance_empty_to(&store, 99, 100);

    let mut snap = store.open_snapshot(101).unwrap();
    snap.put_header(make_header(101, 101, 100)).unwrap();
    snap.put_pointers(vec![pointer_write(1, 1, 1, 101)]).unwrap();
    snap.put_utxos(vec![UtxoRecord {
        txid: txid(7),
        vout: 0,
        value_sat: 10_000,
        script_kind: ScriptKind::P2tr,
        script: vec![0x51],
        block_height: 101,
        spent_at: None,
    }]);
    snap.put_transactions(vec![TxRecord {
        txid: txid(7),
        block_height: 101,
        index_in_block: 0,
        kind: TxKind::Interaction,
        priority_fee_sat: 32,
        gas_sat_fee: 100,
    }]);
    snap.put_receipts(vec![ReceiptRecord {
        txid: txid(7),
        block_height: 101,
        index_in_block: 0,
        status: ReceiptStatus::Completed,
        gas_used: 42,
        return_data: vec![1, 2, 3],
        events: vec![EventRecord {
            contract: contract(1),
            event_type: "Transfer".to_string(),
            data: vec![0xaa],
        }],
    }]);
    let tip = snap.commit().unwrap();

    assert_eq!(tip.height(), 101);
    assert_eq!(store.committed_tip().unwrap().unwrap(), tip);
    assert!(store.utxo(&txid(7), 0).unwrap().is_some());
    assert!(store.transaction(&txid(7)).unwrap().is_some());

    let receipt = store.receipt_by_txid(&txid(7)).unwrap().unwrap();
    assert_eq!(receipt.index_in_block, 0);
    assert_eq!(receipt.gas_used, 42);
    assert_eq!(store.receipt(101, 0).unwrap().unwrap(), receipt);
}

#[test]
fn test_spend_marking_and_rewind_unspends() {
    let (_dir, store) = temp_store();
    advance_empty_to(&store, 99, 100);

    // Block 101 creates the UTXO.
    let mut snap = store.open_snapshot(101).unwrap();
    snap.put_header(make_header(101, 101, 100)).unwrap();
    snap.put_utxos(vec![UtxoRecord {
        txid: txid(9),
        vout: 1,
        value_sat: 5_000,
        script_kind: ScriptKind::P2wpkh,
        script: vec![0x00],
        block_height: 101,
        spent_at: None,
    }]);
    snap.commit().unwrap();

    // Block 102 spends it.
    let mut snap = store.open_snapshot(102).unwrap();
    snap.put_header(make_header(102, 102, 101)).unwrap();
    snap.mark_spent(txid(9), 1);
    snap.commit().unwrap();

    assert_eq!(store.utxo(&txid(9), 1).unwrap().unwrap().spent_at, Some(102));

    // Rewinding past the spend restores the UTXO; rewinding past the
    // creation removes it.
    store.rewind_to(101).unwrap();
    assert_eq!(store.utxo(&txid(9), 1).unwrap().unwrap().spent_at, None);

    store.rewind_to(100).unwrap();
    assert!(store.utxo(&txid(9), 1).unwrap().is_none());
}

#[test]
fn test_rewind_removes_derived_rows() {
    let (_dir, store) = temp_store();
    advance_empty_to(&store, 99, 100);

    for h in [101u64, 102] {
        let mut snap = store.open_snapshot(h).unwrap();
        snap.put_header(make_header(h, h as u8, (h - 1) as u8))
            .unwrap();
        snap.put_pointers(vec![pointer_write(1, 1, h as u8, h)]).unwrap();
        snap.put_transactions(vec![TxRecord {
            txid: txid(h as u8),
            block_height: h,
            index_in_block: 0,
            kind: TxKind::Generic,
            priority_fee_sat: 0,
            gas_sat_fee: 0,
        }]);
        snap.put_receipts(vec![ReceiptRecord {
            txid: txid(h as u8),
            block_height: h,
            index_in_block: 0,
            status: ReceiptStatus::Completed,
            gas_used: 0,
            return_data: vec![],
            events: vec![],
        }]);
        snap.commit().unwrap();
    }

    store.rewind_to(101).unwrap();

    let tip = store.committed_tip().unwrap().unwrap();
    assert_eq!(tip.height(), 101);
    assert_eq!(*tip.blkid(), blkid(101));

    // Height-102 rows are gone, 101 rows remain.
    assert!(store.header_at(102).unwrap().is_none());
    assert!(store.transaction(&txid(102)).unwrap().is_none());
    assert!(store.receipt(102, 0).unwrap().is_none());
    assert!(store.receipt_by_txid(&txid(102)).unwrap().is_none());

    let entry = store.pointer_at(&contract(1), &pointer(1), 200).unwrap().unwrap();
    assert_eq!(entry.last_seen_at, 101);

    // Rewind to the same height is a no-op.
    store.rewind_to(101).unwrap();
    assert_eq!(store.committed_tip().unwrap().unwrap().height(), 101);
}

#[test]
fn test_rewind_drops_epochs_past_target() {
    let (_dir, store) = temp_store();
    advance_empty_to(&store, 99, 100);

    let mut snap = store.open_snapshot(101).unwrap();
    snap.put_header(make_header(101, 101, 100)).unwrap();
    snap.put_epoch(EpochRecord {
        epoch_number: 10,
        start_block: 92,
        end_block: 101,
        target_hash: Buf32::zero(),
        epoch_root: Buf32::zero(),
        epoch_hash: Buf32::zero(),
        proposer: Buf32::zero(),
        proofs: vec![],
    });
    snap.commit().unwrap();

    assert!(store.epoch(10).unwrap().is_some());
    store.rewind_to(100).unwrap();
    assert!(store.epoch(10).unwrap().is_none());
}

#[test]
fn test_epoch_reindex_deletion() {
    let (_dir, store) = temp_store();
    advance_empty_to(&store, 0, 0);

    for n in 0..5u64 {
        let mut snap = store.open_snapshot(n + 1).unwrap();
        snap.put_header(make_header(n + 1, (n + 1) as u8, n as u8))
            .unwrap();
        snap.put_epoch(EpochRecord {
            epoch_number: n,
            start_block: n,
            end_block: n + 1,
            target_hash: Buf32::zero(),
            epoch_root: Buf32::zero(),
            epoch_hash: Buf32::zero(),
            proposer: Buf32::zero(),
            proofs: vec![],
        });
        snap.commit().unwrap();
    }

    store.delete_epochs_from(3).unwrap();
    assert!(store.epoch(2).unwrap().is_some());
    assert!(store.epoch(3).unwrap().is_none());
    assert!(store.epoch(4).unwrap().is_none());
    assert_eq!(store.latest_epoch().unwrap().unwrap().epoch_number, 2);
}

#[test]
fn test_mempool_rows_round_trip() {
    let (_dir, store) = temp_store();

    let row = MempoolRow {
        id: Buf32::new([3u8; 32]),
        is_psbt: true,
        raw: vec![1, 2, 3],
        previous_psbt_id: Some(Buf32::new([2u8; 32])),
        first_seen: 1_700_000_000,
        expires_at_height: Some(110),
    };
    store.put_mempool_row(&row).unwrap();

    // Same identifier under a different psbt flag is a distinct row.
    assert!(store.mempool_row(&row.id, false).unwrap().is_none());
    assert_eq!(store.mempool_row(&row.id, true).unwrap().unwrap(), row);

    assert_eq!(store.mempool_rows().unwrap().len(), 1);

    store.remove_mempool_row(&row.id, true).unwrap();
    assert!(store.mempool_row(&row.id, true).unwrap().is_none());
}

mod pointer_version_properties {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        // A read at probe height returns exactly the entry with the
        // greatest version at or below it, whatever the write pattern.
        #[test]
        fn prop_read_returns_max_version_at_or_below(
            write_heights in proptest::collection::btree_set(100u64..130, 1..8),
            probe in 95u64..140,
        ) {
            let (_dir, store) = temp_store();
            let last = *write_heights.iter().max().unwrap();
            store.init_genesis(&make_header(99, 99, 0)).unwrap();

            for h in 100..=last {
                let mut snap = store.open_snapshot(h).unwrap();
                snap.put_header(make_header(h, h as u8, (h - 1) as u8)).unwrap();
                if write_heights.contains(&h) {
                    snap.put_pointers(vec![pointer_write(1, 1, h as u8, h)]).unwrap();
                }
                snap.commit().unwrap();
            }

            let expected = write_heights.iter().copied().filter(|h| *h <= probe).max();
            let got = store
                .pointer_at(&contract(1), &pointer(1), probe)
                .unwrap()
                .map(|e| e.last_seen_at);
            prop_assert_eq!(got, expected);

            // And the value matches the version it was written with.
            if let Some(version) = expected {
                let entry = store
                    .pointer_at(&contract(1), &pointer(1), probe)
                    .unwrap()
                    .unwrap();
                prop_assert_eq!(entry.value, value(version as u8));
            }
        }
    }
}

#[test]
fn test_contract_redeploy_rejected() {
    let (_dir, store) = temp_store();
    advance_empty_to(&store, 99, 100);

    let record = opnet_db::ContractRecord {
        address: contract(4),
        bytecode: vec![0x00, 0x61, 0x73, 0x6d],
        deployer_pubkey: [2u8; 33],
        contract_seed: Buf32::zero(),
        deployed_at_block: 101,
        tweaked_public_key: [3u8; 33],
        hybrid_public_key: None,
    };

    let mut snap = store.open_snapshot(101).unwrap();
    snap.put_header(make_header(101, 101, 100)).unwrap();
    snap.put_contract(record.clone()).unwrap();
    assert!(matches!(
        snap.put_contract(record.clone()),
        Err(DbError::Conflict(_))
    ));
    snap.commit().unwrap();

    // Redeployment in a later block is also refused.
    let mut snap = store.open_snapshot(102).unwrap();
    snap.put_header(make_header(102, 102, 101)).unwrap();
    assert!(snap.put_contract(record).is_err());
}
