use tokio::sync::watch;
use tracing::info;

/// Triggers a node-wide cooperative shutdown.
#[derive(Debug)]
pub struct ShutdownController {
    tx: watch::Sender<bool>,
}

/// Cloneable shutdown listener carried by every worker and request.
/// Receivers must release any open snapshot (revert or terminate) when
/// this fires.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownController {
    pub fn new() -> (Self, ShutdownSignal) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, ShutdownSignal { rx })
    }

    pub fn trigger(&self) {
        info!("shutdown triggered");
        self.tx.send_replace(true);
    }
}

impl ShutdownSignal {
    /// Resolves once shutdown is triggered. Immediate when it already
    /// was.
    pub async fn recv(&mut self) {
        while !*self.rx.borrow() {
            if self.rx.changed().await.is_err() {
                // Controller dropped without trigger: treat as shutdown.
                return;
            }
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }
}
