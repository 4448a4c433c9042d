use opnet_db::{DbError, EpochRecord, SledNodeStorage};
use opnet_primitives::{merkle_root, sha256, sha256_concat, Buf32, L1BlockId};
use thiserror::Error;
use tracing::{info, warn};

use crate::layout::EpochLayout;

/// Domain tag for the epoch target hash derivation.
const TARGET_TAG: &[u8] = b"opnet-epoch-target";

#[derive(Debug, Clone, Error)]
pub enum EpochError {
    /// An input the finalization depends on is absent. Fatal and
    /// diagnostic: names exactly what is missing.
    #[error("missing dependency: {0}")]
    MissingDependency(String),

    #[error(transparent)]
    Db(#[from] DbError),
}

/// Deterministic epoch target from the window's first block id.
pub fn epoch_target_hash(start_block: &L1BlockId) -> Buf32 {
    sha256_concat(TARGET_TAG, start_block.inner().as_ref())
}

/// Derives and repairs epoch records over committed history.
#[derive(Debug, Clone)]
pub struct EpochManager {
    layout: EpochLayout,
}

impl EpochManager {
    pub fn new(layout: EpochLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &EpochLayout {
        &self.layout
    }

    /// Finalizes the epoch whose window closed at `closed_height`, if one
    /// did. Called while processing `closed_height + 1`; the returned
    /// record is staged into that block's snapshot so epoch and block
    /// commit together.
    pub fn maybe_finalize_closed(
        &self,
        store: &SledNodeStorage,
        closed_height: u64,
        proposer: Buf32,
        proofs: Vec<Vec<u8>>,
    ) -> Result<Option<EpochRecord>, EpochError> {
        let Some(epoch_number) = self.layout.closing_at(closed_height) else {
            return Ok(None);
        };
        if store.epoch(epoch_number)?.is_some() {
            return Ok(None);
        }
        Ok(Some(self.derive_epoch(store, epoch_number, proposer, proofs)?))
    }

    /// Recomputes one epoch from committed headers and the previous
    /// epoch row.
    fn derive_epoch(
        &self,
        store: &SledNodeStorage,
        epoch_number: u64,
        proposer: Buf32,
        proofs: Vec<Vec<u8>>,
    ) -> Result<EpochRecord, EpochError> {
        let start_block = self.layout.start_block(epoch_number);
        let end_block = self.layout.end_block(epoch_number);

        let prev_epoch_hash = if epoch_number == 0 {
            Buf32::zero()
        } else {
            store
                .epoch(epoch_number - 1)?
                .ok_or_else(|| {
                    EpochError::MissingDependency(format!(
                        "epoch {} required to finalize epoch {epoch_number}",
                        epoch_number - 1
                    ))
                })?
                .epoch_hash
        };

        // Block witnesses over the window, in height order.
        let mut witnesses = Vec::with_capacity(self.layout.blocks_per_epoch() as usize);
        let mut start_blkid = None;
        for height in start_block..=end_block {
            let header = store.header_at(height)?.ok_or_else(|| {
                EpochError::MissingDependency(format!(
                    "header {height} required to finalize epoch {epoch_number}"
                ))
            })?;
            if height == start_block {
                start_blkid = Some(header.blkid);
            }
            witnesses.push(block_witness(&header.blkid, &header.checksum_root));
        }

        let target_hash = epoch_target_hash(&start_blkid.expect("window is non-empty"));
        let epoch_root = merkle_root(&witnesses);
        let epoch_hash = chain_epoch_hash(&prev_epoch_hash, &target_hash, &epoch_root);

        Ok(EpochRecord {
            epoch_number,
            start_block,
            end_block,
            target_hash,
            epoch_root,
            epoch_hash,
            proposer,
            proofs,
        })
    }

    /// Deletes all epochs `≥ from_epoch` and re-derives every window that
    /// is fully committed. Returns the number of epochs rebuilt.
    pub fn reindex_from(
        &self,
        store: &SledNodeStorage,
        from_epoch: u64,
    ) -> Result<u64, EpochError> {
        warn!(%from_epoch, "reindexing epochs");
        store.delete_epochs_from(from_epoch)?;

        let Some(tip) = store.committed_tip()? else {
            return Ok(0);
        };

        let mut rebuilt = 0;
        let mut epoch_number = from_epoch;
        while self.layout.end_block(epoch_number) <= tip.height() {
            let record = self.derive_epoch(store, epoch_number, Buf32::zero(), Vec::new())?;
            store.put_epoch(&record)?;
            rebuilt += 1;
            epoch_number += 1;
        }

        info!(%from_epoch, %rebuilt, "epoch reindex complete");
        Ok(rebuilt)
    }
}

/// Witness committed for one block: its id bound to its execution
/// checksum.
fn block_witness(blkid: &L1BlockId, checksum_root: &Buf32) -> Buf32 {
    sha256_concat(blkid.inner().as_ref(), checksum_root.as_ref())
}

/// `H(prev_epoch_hash ∥ target_hash ∥ attestation_root)`.
fn chain_epoch_hash(prev: &Buf32, target: &Buf32, attestation_root: &Buf32) -> Buf32 {
    let mut preimage = Vec::with_capacity(96);
    preimage.extend_from_slice(prev.as_ref());
    preimage.extend_from_slice(target.as_ref());
    preimage.extend_from_slice(attestation_root.as_ref());
    sha256(&preimage)
}
