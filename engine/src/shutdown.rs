//! Stopping the engine.
//!
//! Shutdown ends the reconciler loop through a broadcast channel and cancels
//! every ledger wait that was started with [`ShutdownController::wait_options`].
//! Cancelled orchestrations return [`crate::Outcome::Pending`]; their records
//! stay in flight and the next reconciler run picks them up.

use pharmachain_ledger::{CancelToken, WaitOptions};
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::info;

#[derive(Clone)]
pub struct ShutdownController {
    tx: broadcast::Sender<()>,
    waits: CancelToken,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            waits: CancelToken::new(),
        }
    }

    /// Receiver for background loops to `select!` on.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Wait options for a request that should end when the engine stops.
    pub fn wait_options(&self, timeout: Option<Duration>) -> WaitOptions {
        WaitOptions {
            timeout,
            cancel: Some(self.waits.clone()),
        }
    }

    pub fn shutdown(&self) {
        self.waits.cancel();
        let _ = self.tx.send(());
    }

    pub fn is_triggered(&self) -> bool {
        self.waits.is_cancelled()
    }

    /// Block until SIGINT or SIGTERM, then shut down.
    pub async fn wait_for_signal(&self) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            tokio::select! {
                r = signal::ctrl_c() => { r?; info!("received SIGINT, stopping engine"); }
                _ = terminate.recv() => { info!("received SIGTERM, stopping engine"); }
            }
        }
        #[cfg(not(unix))]
        {
            signal::ctrl_c().await?;
            info!("received Ctrl-C, stopping engine");
        }
        self.shutdown();
        Ok(())
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}
