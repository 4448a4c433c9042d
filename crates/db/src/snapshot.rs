use std::collections::BTreeMap;

use opnet_primitives::{
    BlockRef, ContractAddress, OpTxId, StoragePointer, StorageValue,
};
use tracing::debug;

use crate::{
    errors::{DbError, DbResult},
    schema::{
        contract_height_idx_key, enc, height_key, height_outpoint_key, height_txid_key,
        outpoint_key, pointer_height_idx_key, pointer_key, receipt_key, META_TIP_KEY,
    },
    store::SledNodeStorage,
    types::{
        ContractRecord, EpochRecord, HeaderRecord, PointerRow, ReceiptRecord, StorageEntry,
        TxRecord, UtxoRecord,
    },
};

/// One pointer upsert staged into a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerWrite {
    pub contract: ContractAddress,
    pub pointer: StoragePointer,
    pub value: StorageValue,
    pub proofs: Vec<String>,
    pub last_seen_at: u64,
}

/// The block-scoped storage transaction.
///
/// Everything is buffered in memory until [`commit`](Self::commit), which
/// applies data rows first and advances the tip last; a crash mid-commit
/// leaves the tip unmoved and the block is simply re-driven, overwriting
/// the same keyed rows. `revert` and `terminate` discard the buffer;
/// dropping the snapshot without committing behaves like `revert`.
pub struct BlockSnapshot<'s> {
    store: &'s SledNodeStorage,
    height: u64,

    header: Option<HeaderRecord>,
    pointers: BTreeMap<(ContractAddress, StoragePointer, u64), PointerRow>,
    contracts: BTreeMap<ContractAddress, ContractRecord>,
    new_utxos: BTreeMap<(OpTxId, u32), UtxoRecord>,
    spends: Vec<(OpTxId, u32)>,
    txs: Vec<TxRecord>,
    receipts: Vec<ReceiptRecord>,
    epochs: Vec<EpochRecord>,

    finished: bool,
}

impl std::fmt::Debug for BlockSnapshot<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockSnapshot")
            .field("height", &self.height)
            .field("staged_pointers", &self.pointers.len())
            .field("staged_receipts", &self.receipts.len())
            .finish_non_exhaustive()
    }
}

impl<'s> BlockSnapshot<'s> {
    pub(crate) fn new(store: &'s SledNodeStorage, height: u64) -> Self {
        Self {
            store,
            height,
            header: None,
            pointers: BTreeMap::new(),
            contracts: BTreeMap::new(),
            new_utxos: BTreeMap::new(),
            spends: Vec::new(),
            txs: Vec::new(),
            receipts: Vec::new(),
            epochs: Vec::new(),
            finished: false,
        }
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    // --- reads (committed state merged with staged writes) ---

    /// Versioned pointer read at the snapshot height, seeing staged
    /// writes first.
    pub fn pointer_at(
        &self,
        contract: &ContractAddress,
        pointer: &StoragePointer,
    ) -> DbResult<Option<StorageEntry>> {
        let staged = self
            .pointers
            .range((*contract, *pointer, 0)..=(*contract, *pointer, self.height))
            .next_back();
        if let Some(((c, p, h), row)) = staged {
            return Ok(Some(StorageEntry {
                contract: *c,
                pointer: *p,
                value: row.value,
                proofs: row.proofs.clone(),
                last_seen_at: *h,
            }));
        }
        self.store.pointer_at(contract, pointer, self.height)
    }

    /// Contract lookup seeing same-block deployments.
    pub fn contract(&self, address: &ContractAddress) -> DbResult<Option<ContractRecord>> {
        if let Some(record) = self.contracts.get(address) {
            return Ok(Some(record.clone()));
        }
        self.store.contract(address)
    }

    /// UTXO lookup seeing same-block outputs and spends.
    pub fn utxo(&self, txid: &OpTxId, vout: u32) -> DbResult<Option<UtxoRecord>> {
        if let Some(utxo) = self.new_utxos.get(&(*txid, vout)) {
            return Ok(Some(utxo.clone()));
        }
        let mut utxo = self.store.utxo(txid, vout)?;
        if let Some(u) = &mut utxo {
            if self.spends.contains(&(*txid, vout)) {
                u.spent_at = Some(self.height);
            }
        }
        Ok(utxo)
    }

    // --- staged writes ---

    /// Upserts a batch of pointer versions.
    ///
    /// All-or-nothing: any `(contract, pointer, last_seen_at)` collision,
    /// inside the batch or against already staged writes, fails the whole
    /// batch before anything is staged.
    pub fn put_pointers(&mut self, batch: Vec<PointerWrite>) -> DbResult<()> {
        let mut incoming: BTreeMap<(ContractAddress, StoragePointer, u64), PointerRow> =
            BTreeMap::new();
        for write in batch {
            let key = (write.contract, write.pointer, write.last_seen_at);
            let dup_in_batch = incoming
                .insert(
                    key,
                    PointerRow {
                        value: write.value,
                        proofs: write.proofs,
                    },
                )
                .is_some();
            if dup_in_batch || self.pointers.contains_key(&key) {
                return Err(DbError::DuplicatePointerWrite {
                    height: self.height,
                    key: format!("{}/{}/{}", key.0, key.1, key.2),
                });
            }
        }
        self.pointers.extend(incoming);
        Ok(())
    }

    pub fn put_contract(&mut self, record: ContractRecord) -> DbResult<()> {
        if self.contracts.contains_key(&record.address)
            || self.store.contract(&record.address)?.is_some()
        {
            return Err(DbError::Conflict(format!(
                "contract {} already deployed",
                record.address
            )));
        }
        self.contracts.insert(record.address, record);
        Ok(())
    }

    pub fn put_utxos(&mut self, utxos: Vec<UtxoRecord>) {
        for utxo in utxos {
            self.new_utxos.insert((utxo.txid, utxo.vout), utxo);
        }
    }

    /// Marks an outpoint spent at the snapshot height. Unknown outpoints
    /// are ignored at commit; the node only tracks its own UTXO subset.
    pub fn mark_spent(&mut self, txid: OpTxId, vout: u32) {
        self.spends.push((txid, vout));
    }

    pub fn put_transactions(&mut self, txs: Vec<TxRecord>) {
        self.txs.extend(txs);
    }

    pub fn put_receipts(&mut self, receipts: Vec<ReceiptRecord>) {
        self.receipts.extend(receipts);
    }

    pub fn put_epoch(&mut self, epoch: EpochRecord) {
        self.epochs.push(epoch);
    }

    /// Stages the finalized header. Exactly one per snapshot.
    pub fn put_header(&mut self, header: HeaderRecord) -> DbResult<()> {
        if header.height != self.height {
            return Err(DbError::Corruption(format!(
                "staging header for {} into snapshot at {}",
                header.height, self.height
            )));
        }
        if self.header.is_some() {
            return Err(DbError::Corruption(
                "header already staged for this snapshot".to_string(),
            ));
        }
        self.header = Some(header);
        Ok(())
    }

    // --- lifecycle ---

    /// Durably materializes all staged writes, then advances the tip.
    pub fn commit(mut self) -> DbResult<BlockRef> {
        let header = self.header.take().ok_or_else(|| {
            DbError::Corruption("commit without a staged header".to_string())
        })?;

        // Re-check the tip: a racing rewind may have moved it.
        let tip = self.store.committed_tip()?;
        if let Some(tip) = &tip {
            if self.height != tip.height() + 1 {
                return Err(DbError::Conflict(format!(
                    "tip moved to {} while snapshot {} was open",
                    tip.height(),
                    self.height
                )));
            }
        }

        for ((contract, pointer, last_seen_at), row) in &self.pointers {
            self.store.pointers.insert(
                pointer_key(contract, pointer, *last_seen_at),
                enc(row)?,
            )?;
            self.store.pointer_height_idx.insert(
                pointer_height_idx_key(*last_seen_at, contract, pointer),
                &[],
            )?;
        }

        for (address, record) in &self.contracts {
            self.store.contracts.insert(address.as_bytes(), enc(record)?)?;
            self.store
                .contract_height_idx
                .insert(contract_height_idx_key(self.height, address), &[])?;
        }

        for ((txid, vout), utxo) in &self.new_utxos {
            self.store.utxos.insert(outpoint_key(txid, *vout), enc(utxo)?)?;
            self.store
                .utxo_created_idx
                .insert(height_outpoint_key(self.height, txid, *vout), &[])?;
        }

        for (txid, vout) in &self.spends {
            let Some(raw) = self.store.utxos.get(outpoint_key(txid, *vout))? else {
                continue;
            };
            let mut utxo: UtxoRecord = crate::schema::dec(&raw)?;
            utxo.spent_at = Some(self.height);
            self.store.utxos.insert(outpoint_key(txid, *vout), enc(&utxo)?)?;
            self.store
                .utxo_spent_idx
                .insert(height_outpoint_key(self.height, txid, *vout), &[])?;
        }

        for tx in &self.txs {
            self.store.txs.insert(tx.txid.inner().as_bytes(), enc(tx)?)?;
            self.store
                .tx_height_idx
                .insert(height_txid_key(self.height, &tx.txid), &[])?;
        }

        for receipt in &self.receipts {
            self.store.receipts.insert(
                receipt_key(receipt.block_height, receipt.index_in_block),
                enc(receipt)?,
            )?;
            self.store.receipt_txid_idx.insert(
                receipt.txid.inner().as_bytes(),
                enc(&(receipt.block_height, receipt.index_in_block))?,
            )?;
        }

        for epoch in &self.epochs {
            self.store
                .epochs
                .insert(height_key(epoch.epoch_number), enc(epoch)?)?;
        }

        self.store
            .headers
            .insert(height_key(self.height), enc(&header)?)?;

        let new_tip = BlockRef::new(self.height, header.blkid);
        self.store.meta.insert(META_TIP_KEY, enc(&new_tip)?)?;
        self.store.meta.flush()?;

        self.release();
        debug!(%new_tip, "committed block snapshot");
        Ok(new_tip)
    }

    /// Discards all staged writes for this height. Idempotent by
    /// construction; a dropped snapshot reverts the same way.
    pub fn revert(mut self) {
        self.release();
    }

    /// Releases the transaction without committing. Used by dry runs and
    /// simulations; identical to revert but not logged as a rollback.
    pub fn terminate(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.finished {
            self.finished = true;
            *self.store.writer.lock() = None;
        }
    }
}

impl Drop for BlockSnapshot<'_> {
    fn drop(&mut self) {
        self.release();
    }
}
