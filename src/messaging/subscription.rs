//! Handle to a running consumer loop.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug)]
pub struct SubscriptionHandle {
    queue: Arc<RwLock<String>>,
    routing_key: String,
    cancel_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub(crate) fn new(
        queue: Arc<RwLock<String>>,
        routing_key: impl Into<String>,
        cancel_tx: watch::Sender<bool>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            queue,
            routing_key: routing_key.into(),
            cancel_tx,
            task,
        }
    }

    /// Name of the queue currently consumed. Ephemeral queues get a new
    /// server-assigned name after every reconnect.
    pub fn queue_name(&self) -> String {
        self.queue.read().clone()
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop consuming. A message being handled is settled before the loop exits.
    pub async fn shutdown(self) {
        self.cancel_tx.send_replace(true);
        if let Err(err) = self.task.await {
            debug!(error = %err, "Consumer task ended abnormally");
        }
    }
}

/// Resolves once the subscription was cancelled. A dropped handle detaches
/// the consumer instead of stopping it.
pub(crate) async fn cancelled(cancel_rx: &mut watch::Receiver<bool>) {
    if cancel_rx.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}
