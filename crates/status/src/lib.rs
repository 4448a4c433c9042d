//! Node status fan-out.
//!
//! One channel bundle created at boot and cloned into every worker.
//! Watch channels carry latest-value status; committed blocks go out over
//! a broadcast so every subscriber sees each block exactly once.

use opnet_primitives::BlockRef;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::debug;

/// Where the indexer is relative to the upstream chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChainTipStatus {
    /// Last committed block, if any.
    pub tip: Option<BlockRef>,
    /// Best height the upstream node reports.
    pub upstream_height: u64,
    /// True when the committed tip matches the upstream best block.
    pub in_sync: bool,
}

/// Mempool gauge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MempoolStatus {
    pub entries: usize,
}

const NEW_BLOCK_CAPACITY: usize = 64;

/// The shared status bundle.
#[derive(Debug)]
pub struct StatusChannel {
    tip_tx: watch::Sender<ChainTipStatus>,
    mempool_tx: watch::Sender<MempoolStatus>,
    new_block_tx: broadcast::Sender<BlockRef>,
}

impl StatusChannel {
    pub fn new() -> Self {
        let (tip_tx, _) = watch::channel(ChainTipStatus::default());
        let (mempool_tx, _) = watch::channel(MempoolStatus::default());
        let (new_block_tx, _) = broadcast::channel(NEW_BLOCK_CAPACITY);
        Self {
            tip_tx,
            mempool_tx,
            new_block_tx,
        }
    }

    pub fn update_tip(&self, status: ChainTipStatus) {
        // send_replace: updating with no subscribers is fine.
        self.tip_tx.send_replace(status);
    }

    pub fn tip(&self) -> ChainTipStatus {
        *self.tip_tx.borrow()
    }

    pub fn subscribe_tip(&self) -> watch::Receiver<ChainTipStatus> {
        self.tip_tx.subscribe()
    }

    pub fn update_mempool(&self, status: MempoolStatus) {
        self.mempool_tx.send_replace(status);
    }

    pub fn subscribe_mempool(&self) -> watch::Receiver<MempoolStatus> {
        self.mempool_tx.subscribe()
    }

    /// Publishes a committed block to every subscriber.
    pub fn notify_new_block(&self, block: BlockRef) {
        debug!(%block, "publishing new block");
        // No subscribers is a legal state (early boot).
        let _ = self.new_block_tx.send(block);
    }

    pub fn subscribe_new_blocks(&self) -> broadcast::Receiver<BlockRef> {
        self.new_block_tx.subscribe()
    }
}

impl Default for StatusChannel {
    fn default() -> Self {
        Self::new()
    }
}
