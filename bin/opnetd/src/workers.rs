//! Worker glue for the node binary.

use std::sync::Arc;

use async_trait::async_trait;
use opnet_db::{MempoolRow, SledNodeStorage};
use opnet_mempool::{Mempool, RowStore, Submission, TxVerifier};
use opnet_primitives::Buf32;
use opnet_service::{Bus, BusMessage, BusWorker, ShutdownSignal, WorkerKind};
use opnet_status::{MempoolStatus, StatusChannel};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

/// [`RowStore`] over the shared storage handle.
pub(crate) struct SharedRowStore(pub(crate) Arc<SledNodeStorage>);

impl RowStore for SharedRowStore {
    fn put(&self, row: &MempoolRow) -> Result<(), String> {
        self.0.put_mempool_row(row).map_err(|e| e.to_string())
    }

    fn remove(&self, id: &Buf32, is_psbt: bool) -> Result<(), String> {
        self.0
            .remove_mempool_row(id, is_psbt)
            .map_err(|e| e.to_string())
    }

    fn load_all(&self) -> Result<Vec<MempoolRow>, String> {
        self.0.mempool_rows().map_err(|e| e.to_string())
    }
}

/// Bus worker owning the mempool: admits queued submissions and rebases
/// on every committed block.
pub(crate) struct MempoolWorker<V, S> {
    pool: Mempool<V, S>,
    admission_rx: mpsc::Receiver<Submission>,
    store: Arc<SledNodeStorage>,
    status: Arc<StatusChannel>,
    current_height: u64,
}

impl<V: TxVerifier, S: RowStore> MempoolWorker<V, S> {
    pub(crate) fn new(
        mut pool: Mempool<V, S>,
        admission_rx: mpsc::Receiver<Submission>,
        store: Arc<SledNodeStorage>,
        status: Arc<StatusChannel>,
    ) -> Self {
        let current_height = store
            .committed_tip()
            .ok()
            .flatten()
            .map(|tip| tip.height())
            .unwrap_or(0);
        if let Err(error) = pool.load_persisted(current_height) {
            warn!(%error, "mempool reload failed, starting empty");
        }

        Self {
            pool,
            admission_rx,
            store,
            status,
            current_height,
        }
    }

    fn drain_admissions(&mut self) {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        while let Ok(submission) = self.admission_rx.try_recv() {
            match self.pool.admit(submission, self.current_height, now) {
                Ok(id) => debug!(%id, "admitted from queue"),
                Err(error) => debug!(%error, "queued submission rejected"),
            }
        }
        self.status.update_mempool(MempoolStatus {
            entries: self.pool.len(),
        });
    }

    fn rebase_on(&mut self, height: u64) {
        self.current_height = height;

        let mined: Vec<Buf32> = match self.store.transactions_at(height) {
            Ok(rows) => rows.into_iter().map(|r| *r.txid.inner()).collect(),
            Err(error) => {
                warn!(%height, %error, "could not load block transactions for rebase");
                return;
            }
        };
        let spent = match self.store.spent_outpoints_at(height) {
            Ok(spent) => spent,
            Err(error) => {
                warn!(%height, %error, "could not load spent outpoints for rebase");
                return;
            }
        };

        let evicted = self.pool.rebase(&mined, &spent, height);
        if !evicted.is_empty() {
            debug!(%height, count = evicted.len(), "evicted on rebase");
        }
        self.status.update_mempool(MempoolStatus {
            entries: self.pool.len(),
        });
    }
}

#[async_trait]
impl<V: TxVerifier + Send + 'static, S: RowStore + Send + 'static> BusWorker
    for MempoolWorker<V, S>
{
    fn kind(&self) -> WorkerKind {
        WorkerKind::Mempool
    }

    async fn on_message(&mut self, _message: BusMessage) -> anyhow::Result<()> {
        self.drain_admissions();
        Ok(())
    }

    async fn on_link_message(
        &mut self,
        _peer: WorkerKind,
        message: BusMessage,
    ) -> anyhow::Result<()> {
        if let BusMessage::NewBlockNotify { block } = message {
            self.rebase_on(block.height());
        }
        self.drain_admissions();
        Ok(())
    }
}

/// Bridges committed-block notifications from the status fan-out onto
/// the bus.
pub(crate) async fn forward_new_blocks(
    status: Arc<StatusChannel>,
    bus: Arc<Bus>,
    mut shutdown: ShutdownSignal,
) {
    let mut blocks = status.subscribe_new_blocks();
    loop {
        tokio::select! {
            _ = shutdown.recv() => return,
            received = blocks.recv() => {
                let block = match received {
                    Ok(block) => block,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(%skipped, "block forwarder lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                };
                if let Err(error) = bus
                    .send(
                        WorkerKind::Indexer,
                        WorkerKind::Mempool,
                        BusMessage::NewBlockNotify { block },
                    )
                    .await
                {
                    warn!(%error, "could not forward committed block");
                }
            }
        }
    }
}
