//! Periodic refresh loop handle

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Controls a running auto-refresh loop
pub struct AutoRefreshHandle {
    /// Stop signal
    stop_tx: watch::Sender<bool>,

    /// Loop task
    task: JoinHandle<()>,
}

impl AutoRefreshHandle {
    pub(crate) fn new(stop_tx: watch::Sender<bool>, task: JoinHandle<()>) -> Self {
        Self { stop_tx, task }
    }

    /// Ask the loop to stop before its next cycle
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Wait for the loop to exit
    pub async fn join(self) {
        let Self { stop_tx, task } = self;
        if let Err(e) = task.await {
            tracing::error!("auto-refresh task failed: {}", e);
        }
        drop(stop_tx);
    }
}
