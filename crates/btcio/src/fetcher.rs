use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use bitcoin::Block;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::{
    client::L1Client,
    error::{L1Error, L1Result},
};

/// Bounded, deduplicating block prefetcher.
///
/// Keeps an ordered map `height → pending fetch`; the map size is the
/// in-flight budget, so at most `max_prefetch` upstream requests exist at
/// any point and each height is fetched exactly once. Failed fetches drop
/// out of the map immediately so a retry issues a fresh request.
///
/// Single consumer: the block processor takes heights in ascending order.
pub struct BlockFetcher<C> {
    client: Arc<C>,
    max_prefetch: usize,

    pending: Arc<Mutex<BTreeMap<u64, oneshot::Receiver<L1Result<Block>>>>>,

    /// Highest height worth prefetching (the upstream tip). Heights above
    /// this are only fetched on demand.
    horizon: AtomicU64,
}

impl<C> std::fmt::Debug for BlockFetcher<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockFetcher")
            .field("max_prefetch", &self.max_prefetch)
            .field("pending", &self.pending.lock().len())
            .finish_non_exhaustive()
    }
}

impl<C: L1Client> BlockFetcher<C> {
    pub fn new(client: Arc<C>, max_prefetch: usize) -> Self {
        Self {
            client,
            max_prefetch: max_prefetch.max(1),
            pending: Arc::new(Mutex::new(BTreeMap::new())),
            horizon: AtomicU64::new(0),
        }
    }

    /// Updates the prefetch horizon from the latest known upstream tip.
    pub fn set_horizon(&self, tip_height: u64) {
        self.horizon.store(tip_height, Ordering::Relaxed);
    }

    /// Returns the block at `height`, prefetching the heights behind it.
    ///
    /// The requested height joins the pending map before the prefetch
    /// top-up and is taken out last, so the map size bounds every fetch in
    /// flight, the direct one included.
    pub async fn get_block(&self, height: u64) -> L1Result<Block> {
        let rx = {
            let mut pending = self.pending.lock();
            if !pending.contains_key(&height) {
                let rx = self.spawn_fetch(height);
                pending.insert(height, rx);
            }
            drop(pending);

            self.prefetch_from(height + 1);

            // A fast-failing fetch removes its own slot before handoff.
            let Some(rx) = self.pending.lock().remove(&height) else {
                return Err(L1Error::Transient(format!(
                    "fetch for height {height} failed before handoff"
                )));
            };
            rx
        };

        match rx.await {
            Ok(result) => result,
            // The fetch task dropped its sender without sending; treat as
            // a retryable upstream hiccup.
            Err(_) => Err(L1Error::Transient(format!(
                "fetch for height {height} aborted"
            ))),
        }
    }

    /// Drops all pending fetches. Called on reorg so stale futures for
    /// replaced heights are never served.
    pub fn clear(&self) {
        let mut pending = self.pending.lock();
        if !pending.is_empty() {
            debug!(count = pending.len(), "clearing pending block fetches");
            pending.clear();
        }
    }

    /// Issues prefetches for `start..` while the in-flight budget and the
    /// horizon allow, skipping heights already pending.
    fn prefetch_from(&self, start: u64) {
        let horizon = self.horizon.load(Ordering::Relaxed);
        let mut pending = self.pending.lock();
        for height in start..start + self.max_prefetch as u64 {
            if pending.len() >= self.max_prefetch {
                break;
            }
            if height > horizon || pending.contains_key(&height) {
                continue;
            }
            let rx = self.spawn_fetch(height);
            pending.insert(height, rx);
        }
    }

    fn spawn_fetch(&self, height: u64) -> oneshot::Receiver<L1Result<Block>> {
        let (tx, rx) = oneshot::channel();
        let client = self.client.clone();
        let pending = self.pending.clone();

        tokio::spawn(async move {
            let result = client.block_at(height).await;
            if let Err(error) = &result {
                // Remove immediately so the next request refetches.
                pending.lock().remove(&height);
                warn!(%height, %error, "block fetch failed");
            }
            let _ = tx.send(result);
        });

        rx
    }
}
