use async_trait::async_trait;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error};

use crate::{
    message::{BusMessage, Envelope, WorkerKind},
    shutdown::ShutdownSignal,
};

/// One worker-local component on the bus.
///
/// `on_message` handles traffic addressed to the worker itself;
/// `on_link_message` handles traffic arriving over a link from another
/// worker. Handler errors are logged and the loop continues; a panic
/// inside a handler takes the worker task down and is treated as
/// corruption by the supervisor.
#[async_trait]
pub trait BusWorker: Send + 'static {
    fn kind(&self) -> WorkerKind;

    async fn on_message(&mut self, message: BusMessage) -> anyhow::Result<()>;

    async fn on_link_message(
        &mut self,
        peer: WorkerKind,
        message: BusMessage,
    ) -> anyhow::Result<()>;
}

/// Runs a worker's receive loop until shutdown or queue closure.
pub fn spawn_worker<W: BusWorker>(
    mut worker: W,
    mut inbox: mpsc::Receiver<Envelope>,
    mut shutdown: ShutdownSignal,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let kind = worker.kind();
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!(%kind, "worker stopping on shutdown");
                    return;
                }
                envelope = inbox.recv() => {
                    let Some(Envelope { from, message }) = envelope else {
                        debug!(%kind, "worker inbox closed");
                        return;
                    };

                    let message_kind = message.kind();
                    let result = if from == kind {
                        worker.on_message(message).await
                    } else {
                        worker.on_link_message(from, message).await
                    };
                    if let Err(error) = result {
                        error!(%kind, %from, message_kind, %error, "worker handler failed");
                    }
                }
            }
        }
    })
}
