use std::{collections::HashMap, time::Duration};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::trace;

use crate::message::{BusMessage, Envelope, WorkerKind};

/// Deadline applied by [`Bus::request`]. Expiry is surfaced, never
/// retried automatically.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const WORKER_QUEUE_DEPTH: usize = 256;

#[derive(Debug, Clone, Error)]
pub enum BusError {
    /// No worker of that kind is registered.
    #[error("no route to worker {0}")]
    Unroutable(WorkerKind),

    /// The worker's queue is gone (it shut down).
    #[error("worker {0} closed")]
    Closed(WorkerKind),

    /// The reply deadline expired or the reply slot was dropped.
    #[error("bus request timed out")]
    Timeout,
}

/// The typed message bus.
///
/// Built once at boot: every worker registers before any worker starts,
/// then the bus is cloned (cheaply, via the sender map) into each of
/// them.
#[derive(Debug, Default)]
pub struct Bus {
    senders: HashMap<WorkerKind, mpsc::Sender<Envelope>>,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a worker, returning its inbox. Registering the same
    /// kind twice replaces the route.
    pub fn register(&mut self, kind: WorkerKind) -> mpsc::Receiver<Envelope> {
        let (tx, rx) = mpsc::channel(WORKER_QUEUE_DEPTH);
        self.senders.insert(kind, tx);
        rx
    }

    /// Fire-and-forget send. FIFO per (from, to) pair.
    pub async fn send(
        &self,
        from: WorkerKind,
        to: WorkerKind,
        message: BusMessage,
    ) -> Result<(), BusError> {
        let sender = self.senders.get(&to).ok_or(BusError::Unroutable(to))?;
        trace!(%from, %to, kind = message.kind(), "bus send");
        sender
            .send(Envelope { from, message })
            .await
            .map_err(|_| BusError::Closed(to))
    }

    /// Request/response with the default deadline.
    ///
    /// The caller builds the message around the provided reply slot:
    ///
    /// ```ignore
    /// let block = bus
    ///     .request(WorkerKind::Api, WorkerKind::Indexer, |reply| {
    ///         BusMessage::GetCurrentBlock { reply }
    ///     })
    ///     .await?;
    /// ```
    pub async fn request<T>(
        &self,
        from: WorkerKind,
        to: WorkerKind,
        build: impl FnOnce(oneshot::Sender<T>) -> BusMessage,
    ) -> Result<T, BusError> {
        self.request_with_timeout(from, to, DEFAULT_REQUEST_TIMEOUT, build)
            .await
    }

    /// Request/response with an explicit deadline.
    pub async fn request_with_timeout<T>(
        &self,
        from: WorkerKind,
        to: WorkerKind,
        timeout: Duration,
        build: impl FnOnce(oneshot::Sender<T>) -> BusMessage,
    ) -> Result<T, BusError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(from, to, build(reply_tx)).await?;

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(value)) => Ok(value),
            // Receiver error means the responder dropped the slot.
            Ok(Err(_)) | Err(_) => Err(BusError::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use opnet_primitives::{BlockRef, Buf32, L1BlockId};

    use super::*;

    fn block(height: u64) -> BlockRef {
        BlockRef::new(height, L1BlockId::new(Buf32::new([height as u8; 32])))
    }

    #[tokio::test]
    async fn test_request_reply_round_trip() {
        let mut bus = Bus::new();
        let mut indexer_rx = bus.register(WorkerKind::Indexer);

        // Responder: answer one GetCurrentBlock.
        tokio::spawn(async move {
            let envelope = indexer_rx.recv().await.unwrap();
            assert_eq!(envelope.from, WorkerKind::Api);
            match envelope.message {
                BusMessage::GetCurrentBlock { reply } => {
                    reply.send(Some(block(42))).unwrap();
                }
                other => panic!("unexpected message {}", other.kind()),
            }
        });

        let result = bus
            .request(WorkerKind::Api, WorkerKind::Indexer, |reply| {
                BusMessage::GetCurrentBlock { reply }
            })
            .await
            .unwrap();
        assert_eq!(result, Some(block(42)));
    }

    #[tokio::test]
    async fn test_dropped_reply_slot_is_timeout() {
        let mut bus = Bus::new();
        let mut rx = bus.register(WorkerKind::Indexer);

        tokio::spawn(async move {
            // Receive and drop the message (and with it the reply slot).
            let _ = rx.recv().await;
        });

        let err = bus
            .request_with_timeout(
                WorkerKind::Api,
                WorkerKind::Indexer,
                Duration::from_secs(5),
                |reply| BusMessage::GetCurrentBlock { reply },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Timeout));
    }

    #[tokio::test]
    async fn test_deadline_expiry_is_timeout() {
        let mut bus = Bus::new();
        // Keep the receiver alive but never answer.
        let _rx = bus.register(WorkerKind::Indexer);

        let err = bus
            .request_with_timeout(
                WorkerKind::Api,
                WorkerKind::Indexer,
                Duration::from_millis(20),
                |reply| BusMessage::GetCurrentBlock { reply },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Timeout));
    }

    #[tokio::test]
    async fn test_unroutable_worker() {
        let bus = Bus::new();
        let err = bus
            .send(
                WorkerKind::Api,
                WorkerKind::Plugin,
                BusMessage::NewBlockNotify { block: block(1) },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Unroutable(WorkerKind::Plugin)));
    }

    #[tokio::test]
    async fn test_fifo_per_sender() {
        let mut bus = Bus::new();
        let mut rx = bus.register(WorkerKind::Mempool);

        for height in 0..50u64 {
            bus.send(
                WorkerKind::Indexer,
                WorkerKind::Mempool,
                BusMessage::NewBlockNotify {
                    block: block(height),
                },
            )
            .await
            .unwrap();
        }

        for height in 0..50u64 {
            let envelope = rx.recv().await.unwrap();
            match envelope.message {
                BusMessage::NewBlockNotify { block: b } => assert_eq!(b.height(), height),
                other => panic!("unexpected message {}", other.kind()),
            }
        }
    }
}
