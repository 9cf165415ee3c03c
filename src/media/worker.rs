//! Long-running `post.deleted` consumer for the media service.
//!
//! Subscribes once (retrying with backoff while the broker is unreachable);
//! after that the broker client itself resubscribes across reconnects.

use std::future::Future;
use std::sync::Arc;

use tracing::{info, warn};

use super::cleanup::MediaCleanup;
use super::handler::PostDeletedHandler;
use crate::config::MediaWorkerConfig;
use crate::messaging::{
    BrokerProvider, MessagingResult, QueueBinding, ReconnectBackoff, SubscriptionHandle,
};

#[derive(Debug)]
pub struct MediaCleanupWorker {
    broker: Arc<BrokerProvider>,
    handler: Arc<PostDeletedHandler>,
    config: MediaWorkerConfig,
    backoff: ReconnectBackoff,
}

impl MediaCleanupWorker {
    pub fn new(
        broker: Arc<BrokerProvider>,
        cleanup: MediaCleanup,
        config: &MediaWorkerConfig,
        backoff: ReconnectBackoff,
    ) -> Self {
        Self {
            broker,
            handler: Arc::new(PostDeletedHandler::new(cleanup)),
            config: config.clone(),
            backoff,
        }
    }

    pub fn binding(&self) -> QueueBinding {
        QueueBinding::from(self.config.queue_name.as_str())
    }

    /// One subscribe attempt.
    pub async fn start(&self) -> MessagingResult<SubscriptionHandle> {
        let handle = self
            .broker
            .subscribe(
                &self.config.exchange,
                &self.config.routing_key,
                self.binding(),
                self.handler.clone(),
            )
            .await?;
        info!(
            exchange = %self.config.exchange,
            routing_key = %self.config.routing_key,
            queue = %handle.queue_name(),
            "Media cleanup worker subscribed"
        );
        Ok(handle)
    }

    /// Subscribe, retrying with backoff until it succeeds. `None` if
    /// `shutdown` resolves first.
    pub async fn start_with_retry<F>(&self, shutdown: F) -> Option<SubscriptionHandle>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut attempt: u32 = 0;
        loop {
            match self.start().await {
                Ok(handle) => return Some(handle),
                Err(e) => {
                    let delay = self.backoff.delay_for(attempt);
                    warn!(
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Media cleanup worker could not subscribe; retrying"
                    );
                    attempt = attempt.saturating_add(1);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = &mut shutdown => return None,
                    }
                }
            }
        }
    }

    /// Consume until `shutdown` resolves, then stop the consumer and close
    /// the broker connection.
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        if let Some(handle) = self.start_with_retry(&mut shutdown).await {
            shutdown.await;
            info!("Media cleanup worker stopping");
            handle.shutdown().await;
        }
        self.broker.shutdown().await;
        info!("Media cleanup worker stopped");
    }
}
