use std::{sync::Arc, time::Duration};

use opnet_primitives::L1BlockId;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::client::L1Client;

/// A tip change observed upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TipEvent {
    pub height: u64,
    pub best_block: L1BlockId,
}

/// External nudge to re-poll immediately.
///
/// This is where a notification-socket listener plugs in; hints only move
/// the poll forward, chain info stays the ground truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TipHint {
    PollNow,
}

/// Handle to a running tip watcher.
#[derive(Debug)]
pub struct TipWatcherHandle {
    events: watch::Receiver<Option<TipEvent>>,
    hints: mpsc::Sender<TipHint>,
    task: JoinHandle<()>,
}

impl TipWatcherHandle {
    /// Receiver for the latest observed tip.
    pub fn subscribe(&self) -> watch::Receiver<Option<TipEvent>> {
        self.events.clone()
    }

    /// Inlet for external poll hints.
    pub fn hint_inlet(&self) -> mpsc::Sender<TipHint> {
        self.hints.clone()
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

/// Polls upstream chain info and publishes tip changes.
#[derive(Debug)]
pub struct TipWatcher<C> {
    client: Arc<C>,
    poll_interval: Duration,
}

impl<C: L1Client> TipWatcher<C> {
    pub fn new(client: Arc<C>, poll_interval: Duration) -> Self {
        Self {
            client,
            poll_interval,
        }
    }

    /// Spawns the watcher loop.
    pub fn spawn(self) -> TipWatcherHandle {
        let (event_tx, event_rx) = watch::channel(None);
        let (hint_tx, hint_rx) = mpsc::channel(16);

        let task = tokio::spawn(tip_watch_task(
            self.client,
            self.poll_interval,
            event_tx,
            hint_rx,
        ));

        TipWatcherHandle {
            events: event_rx,
            hints: hint_tx,
            task,
        }
    }
}

async fn tip_watch_task<C: L1Client>(
    client: Arc<C>,
    poll_interval: Duration,
    event_tx: watch::Sender<Option<TipEvent>>,
    mut hint_rx: mpsc::Receiver<TipHint>,
) {
    let mut last: Option<TipEvent> = None;

    loop {
        match client.chain_info().await {
            Ok(info) => {
                let event = TipEvent {
                    height: info.blocks,
                    best_block: info.best_block_hash.into(),
                };
                if last != Some(event) {
                    info!(height = %event.height, best = %event.best_block, "upstream tip changed");
                    last = Some(event);
                    if event_tx.send(Some(event)).is_err() {
                        debug!("all tip subscribers dropped, stopping watcher");
                        return;
                    }
                }
            }
            Err(error) => {
                // Polling again next round is the retry.
                warn!(%error, "tip poll failed");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            hint = hint_rx.recv() => {
                if let Some(TipHint::PollNow) = hint {
                    debug!("tip poll hint received");
                }
                // Channel closed just degrades to pure polling.
            }
        }
    }
}
