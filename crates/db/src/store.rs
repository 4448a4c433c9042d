use std::path::Path;

use opnet_primitives::{BlockRef, Buf32, ContractAddress, OpTxId, StoragePointer};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{
    errors::{DbError, DbResult},
    schema::{self, dec, enc, height_key, mempool_key, outpoint_key, pointer_key, receipt_key},
    snapshot::BlockSnapshot,
    types::{
        ContractRecord, EpochRecord, HeaderRecord, MempoolRow, PointerRow, ReceiptRecord,
        StorageEntry, TxRecord, UtxoRecord,
    },
};

/// The sled-backed node store.
///
/// Single writer: at most one open [`BlockSnapshot`] (or rewind) at a
/// time, enforced by the writer slot. Readers go straight at the
/// committed trees.
pub struct SledNodeStorage {
    #[allow(dead_code, reason = "owns the tree handles' backing database")]
    db: sled::Db,

    pub(crate) meta: sled::Tree,
    pub(crate) headers: sled::Tree,
    pub(crate) pointers: sled::Tree,
    pub(crate) pointer_height_idx: sled::Tree,
    pub(crate) contracts: sled::Tree,
    pub(crate) contract_height_idx: sled::Tree,
    pub(crate) utxos: sled::Tree,
    pub(crate) utxo_created_idx: sled::Tree,
    pub(crate) utxo_spent_idx: sled::Tree,
    pub(crate) txs: sled::Tree,
    pub(crate) tx_height_idx: sled::Tree,
    pub(crate) receipts: sled::Tree,
    pub(crate) receipt_txid_idx: sled::Tree,
    pub(crate) mempool: sled::Tree,
    pub(crate) epochs: sled::Tree,

    /// Height currently held by a snapshot or rewind, if any.
    pub(crate) writer: Mutex<Option<u64>>,
}

impl std::fmt::Debug for SledNodeStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledNodeStorage")
            .field("writer", &*self.writer.lock())
            .finish_non_exhaustive()
    }
}

impl SledNodeStorage {
    /// Opens (or creates) the store under the given directory.
    pub fn open(path: &Path) -> DbResult<Self> {
        let db = sled::open(path)?;
        Ok(Self {
            meta: db.open_tree(schema::TREE_META)?,
            headers: db.open_tree(schema::TREE_HEADERS)?,
            pointers: db.open_tree(schema::TREE_POINTERS)?,
            pointer_height_idx: db.open_tree(schema::TREE_POINTER_HEIGHT_IDX)?,
            contracts: db.open_tree(schema::TREE_CONTRACTS)?,
            contract_height_idx: db.open_tree(schema::TREE_CONTRACT_HEIGHT_IDX)?,
            utxos: db.open_tree(schema::TREE_UTXOS)?,
            utxo_created_idx: db.open_tree(schema::TREE_UTXO_CREATED_IDX)?,
            utxo_spent_idx: db.open_tree(schema::TREE_UTXO_SPENT_IDX)?,
            txs: db.open_tree(schema::TREE_TXS)?,
            tx_height_idx: db.open_tree(schema::TREE_TX_HEIGHT_IDX)?,
            receipts: db.open_tree(schema::TREE_RECEIPTS)?,
            receipt_txid_idx: db.open_tree(schema::TREE_RECEIPT_TXID_IDX)?,
            mempool: db.open_tree(schema::TREE_MEMPOOL)?,
            epochs: db.open_tree(schema::TREE_EPOCHS)?,
            writer: Mutex::new(None),
            db,
        })
    }

    // --- tip / headers ---

    pub fn committed_tip(&self) -> DbResult<Option<BlockRef>> {
        self.meta
            .get(schema::META_TIP_KEY)?
            .map(|raw| dec(&raw))
            .transpose()
    }

    pub fn header_at(&self, height: u64) -> DbResult<Option<HeaderRecord>> {
        self.headers
            .get(height_key(height))?
            .map(|raw| dec(&raw))
            .transpose()
    }

    /// Seeds the pre-genesis tip so the first real snapshot has a parent.
    /// No-op when a tip already exists.
    pub fn init_genesis(&self, genesis: &HeaderRecord) -> DbResult<()> {
        if self.committed_tip()?.is_some() {
            return Ok(());
        }
        self.headers
            .insert(height_key(genesis.height), enc(genesis)?)?;
        let tip = BlockRef::new(genesis.height, genesis.blkid);
        self.meta.insert(schema::META_TIP_KEY, enc(&tip)?)?;
        debug!(%tip, "seeded genesis tip");
        Ok(())
    }

    // --- pointers ---

    /// Returns the entry with the greatest `last_seen_at ≤ at_height`, if
    /// any. The composite key makes the newest qualifying version the last
    /// one in the scanned range.
    pub fn pointer_at(
        &self,
        contract: &ContractAddress,
        pointer: &StoragePointer,
        at_height: u64,
    ) -> DbResult<Option<StorageEntry>> {
        let lo = pointer_key(contract, pointer, 0);
        let hi = pointer_key(contract, pointer, at_height);
        let Some(kv) = self.pointers.range(lo..=hi).next_back() else {
            return Ok(None);
        };
        let (key, raw) = kv?;
        let last_seen_at = u64::from_be_bytes(
            key[64..]
                .try_into()
                .map_err(|_| DbError::Corruption("short pointer key".to_string()))?,
        );
        let row: PointerRow = dec(&raw)?;
        Ok(Some(StorageEntry {
            contract: *contract,
            pointer: *pointer,
            value: row.value,
            proofs: row.proofs,
            last_seen_at,
        }))
    }

    // --- contracts ---

    pub fn contract(&self, address: &ContractAddress) -> DbResult<Option<ContractRecord>> {
        self.contracts
            .get(address.as_bytes())?
            .map(|raw| dec(&raw))
            .transpose()
    }

    // --- utxos ---

    pub fn utxo(&self, txid: &OpTxId, vout: u32) -> DbResult<Option<UtxoRecord>> {
        self.utxos
            .get(outpoint_key(txid, vout))?
            .map(|raw| dec(&raw))
            .transpose()
    }

    // --- transactions / receipts ---

    pub fn transaction(&self, txid: &OpTxId) -> DbResult<Option<TxRecord>> {
        self.txs
            .get(txid.inner().as_bytes())?
            .map(|raw| dec(&raw))
            .transpose()
    }

    /// Committed transactions of one block, for mempool rebase.
    pub fn transactions_at(&self, height: u64) -> DbResult<Vec<TxRecord>> {
        let lo = height_key(height).to_vec();
        let hi = height_key(height + 1).to_vec();
        let mut out = Vec::new();
        for key in self.tx_height_idx.range(lo..hi).keys() {
            let key = key?;
            if let Some(raw) = self.txs.get(&key[8..])? {
                out.push(dec(&raw)?);
            }
        }
        Ok(out)
    }

    /// Outpoints marked spent by one block, for mempool rebase.
    pub fn spent_outpoints_at(&self, height: u64) -> DbResult<Vec<(OpTxId, u32)>> {
        let lo = height_key(height).to_vec();
        let hi = height_key(height + 1).to_vec();
        let mut out = Vec::new();
        for key in self.utxo_spent_idx.range(lo..hi).keys() {
            let (_, txid, vout) = schema::split_height_outpoint_key(&key?)?;
            out.push((txid, vout));
        }
        Ok(out)
    }

    pub fn receipt(&self, height: u64, index_in_block: u32) -> DbResult<Option<ReceiptRecord>> {
        self.receipts
            .get(receipt_key(height, index_in_block))?
            .map(|raw| dec(&raw))
            .transpose()
    }

    pub fn receipt_by_txid(&self, txid: &OpTxId) -> DbResult<Option<ReceiptRecord>> {
        let Some(raw) = self.receipt_txid_idx.get(txid.inner().as_bytes())? else {
            return Ok(None);
        };
        let (height, index): (u64, u32) = dec(&raw)?;
        self.receipt(height, index)
    }

    // --- epochs ---

    pub fn epoch(&self, epoch_number: u64) -> DbResult<Option<EpochRecord>> {
        self.epochs
            .get(height_key(epoch_number))?
            .map(|raw| dec(&raw))
            .transpose()
    }

    pub fn latest_epoch(&self) -> DbResult<Option<EpochRecord>> {
        let Some(kv) = self.epochs.iter().next_back() else {
            return Ok(None);
        };
        let (_, raw) = kv?;
        Ok(Some(dec(&raw)?))
    }

    /// Writes an epoch row outside any snapshot. Reindex repair only;
    /// the block-scoped path stages epochs through the snapshot.
    pub fn put_epoch(&self, record: &EpochRecord) -> DbResult<()> {
        self.epochs
            .insert(height_key(record.epoch_number), enc(record)?)?;
        Ok(())
    }

    /// Deletes every epoch row with `epoch_number ≥ from_epoch`. Used by
    /// epoch reindexing; block-scoped epoch writes go through snapshots.
    pub fn delete_epochs_from(&self, from_epoch: u64) -> DbResult<()> {
        let keys: Vec<_> = self
            .epochs
            .range(height_key(from_epoch).to_vec()..)
            .keys()
            .collect::<Result<_, _>>()?;
        for key in keys {
            self.epochs.remove(key)?;
        }
        Ok(())
    }

    // --- mempool rows (not block-scoped; admission happens off-block) ---

    pub fn mempool_row(&self, id: &Buf32, is_psbt: bool) -> DbResult<Option<MempoolRow>> {
        self.mempool
            .get(mempool_key(id, is_psbt))?
            .map(|raw| dec(&raw))
            .transpose()
    }

    pub fn put_mempool_row(&self, row: &MempoolRow) -> DbResult<()> {
        self.mempool
            .insert(mempool_key(&row.id, row.is_psbt), enc(row)?)?;
        Ok(())
    }

    pub fn remove_mempool_row(&self, id: &Buf32, is_psbt: bool) -> DbResult<()> {
        self.mempool.remove(mempool_key(id, is_psbt))?;
        Ok(())
    }

    pub fn mempool_rows(&self) -> DbResult<Vec<MempoolRow>> {
        self.mempool
            .iter()
            .values()
            .map(|raw| dec(&raw?))
            .collect()
    }

    // --- snapshots ---

    /// Begins the block-scoped transaction for `height`.
    ///
    /// The previous height must be the committed tip (any height is
    /// accepted on a fresh store). A second concurrent snapshot, or one
    /// racing a rewind, fails with `Conflict`.
    pub fn open_snapshot(&self, height: u64) -> DbResult<BlockSnapshot<'_>> {
        let tip = self.committed_tip()?;
        if let Some(tip) = &tip {
            if height != tip.height() + 1 {
                return Err(DbError::PreconditionViolation {
                    requested: height,
                    required: height.saturating_sub(1),
                    tip: Some(tip.height()),
                });
            }
        }

        let mut writer = self.writer.lock();
        if let Some(held) = *writer {
            return Err(DbError::Conflict(format!(
                "snapshot for height {held} already open"
            )));
        }
        *writer = Some(height);
        drop(writer);

        Ok(BlockSnapshot::new(self, height))
    }

    // --- rewind ---

    /// Rewinds all derived state above `to_height` and resets the tip.
    ///
    /// Deletions run newest-first per tree; the tip row is rewritten last
    /// so an interrupted rewind re-runs idempotently.
    pub fn rewind_to(&self, to_height: u64) -> DbResult<()> {
        let Some(tip) = self.committed_tip()? else {
            return Err(DbError::NotFound("rewind on empty store".to_string()));
        };
        if to_height > tip.height() {
            return Err(DbError::Conflict(format!(
                "rewind target {to_height} above tip {}",
                tip.height()
            )));
        }
        if to_height == tip.height() {
            return Ok(());
        }

        let mut writer = self.writer.lock();
        if let Some(held) = *writer {
            return Err(DbError::Conflict(format!(
                "rewind racing open snapshot for height {held}"
            )));
        }
        *writer = Some(to_height);
        drop(writer);

        let result = self.rewind_inner(to_height, tip.height());
        *self.writer.lock() = None;
        result
    }

    fn rewind_inner(&self, to_height: u64, tip_height: u64) -> DbResult<()> {
        warn!(%tip_height, %to_height, "rewinding derived state");
        let from = height_key(to_height + 1).to_vec();

        // Pointer versions above the target.
        let keys: Vec<_> = self
            .pointer_height_idx
            .range(from.clone()..)
            .keys()
            .collect::<Result<_, _>>()?;
        for key in keys {
            let (height, contract, pointer) = schema::split_pointer_height_idx_key(&key)?;
            self.pointers.remove(pointer_key(&contract, &pointer, height))?;
            self.pointer_height_idx.remove(key)?;
        }

        // Deployments above the target.
        let keys: Vec<_> = self
            .contract_height_idx
            .range(from.clone()..)
            .keys()
            .collect::<Result<_, _>>()?;
        for key in keys {
            self.contracts.remove(&key[8..])?;
            self.contract_height_idx.remove(key)?;
        }

        // UTXOs created above the target.
        let keys: Vec<_> = self
            .utxo_created_idx
            .range(from.clone()..)
            .keys()
            .collect::<Result<_, _>>()?;
        for key in keys {
            let (_, txid, vout) = schema::split_height_outpoint_key(&key)?;
            self.utxos.remove(outpoint_key(&txid, vout))?;
            self.utxo_created_idx.remove(key)?;
        }

        // Spends recorded above the target become unspent again.
        let keys: Vec<_> = self
            .utxo_spent_idx
            .range(from.clone()..)
            .keys()
            .collect::<Result<_, _>>()?;
        for key in keys {
            let (_, txid, vout) = schema::split_height_outpoint_key(&key)?;
            if let Some(raw) = self.utxos.get(outpoint_key(&txid, vout))? {
                let mut utxo: UtxoRecord = dec(&raw)?;
                utxo.spent_at = None;
                self.utxos.insert(outpoint_key(&txid, vout), enc(&utxo)?)?;
            }
            self.utxo_spent_idx.remove(key)?;
        }

        // Committed transactions above the target.
        let keys: Vec<_> = self
            .tx_height_idx
            .range(from.clone()..)
            .keys()
            .collect::<Result<_, _>>()?;
        for key in keys {
            self.txs.remove(&key[8..])?;
            self.tx_height_idx.remove(key)?;
        }

        // Receipts above the target.
        let entries: Vec<_> = self
            .receipts
            .range(from.clone()..)
            .collect::<Result<Vec<_>, _>>()?;
        for (key, raw) in entries {
            let receipt: ReceiptRecord = dec(&raw)?;
            self.receipt_txid_idx
                .remove(receipt.txid.inner().as_bytes())?;
            self.receipts.remove(key)?;
        }

        // Epochs whose window is no longer fully committed.
        let entries: Vec<_> = self.epochs.iter().collect::<Result<Vec<_>, _>>()?;
        for (key, raw) in entries {
            let epoch: EpochRecord = dec(&raw)?;
            if epoch.end_block > to_height {
                self.epochs.remove(key)?;
            }
        }

        // Headers last-but-one, tip last.
        let keys: Vec<_> = self
            .headers
            .range(from..)
            .keys()
            .collect::<Result<_, _>>()?;
        for key in keys {
            self.headers.remove(key)?;
        }

        let header = self.header_at(to_height)?.ok_or_else(|| {
            DbError::Corruption(format!("no header at rewind target {to_height}"))
        })?;
        let tip = BlockRef::new(to_height, header.blkid);
        self.meta.insert(schema::META_TIP_KEY, enc(&tip)?)?;
        self.meta.flush()?;
        Ok(())
    }
}
