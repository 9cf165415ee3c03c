//! # In-Memory Broker Client
//!
//! Broker client backed by an [`InMemoryBrokerServer`]. Goes through the same
//! [`ConnectionManager`] as the RabbitMQ client, so reconnect behavior,
//! channel memoization and resubscription are exercised identically in tests.
//! Several clients may share one server, which is how tests wire a producer
//! and a consumer together in one process.
//!
//! Consumers pull ahead into a local buffer as far as the prefetch window
//! allows and hand messages to the handler one at a time, as an AMQP client
//! does with pushed deliveries.

mod server;

pub use server::{BrokerStats, InMemoryBrokerServer, InMemoryConnection};

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::BrokerConfig;
use crate::messaging::backoff::ReconnectBackoff;
use crate::messaging::channel_cache::ChannelCache;
use crate::messaging::connection::{wait_until_connected, ConnectionManager, Connector, Established};
use crate::messaging::errors::{MessagingError, MessagingResult};
use crate::messaging::handler::{dispatch, MessageHandler};
use crate::messaging::message::QueueMessage;
use crate::messaging::subscription::{cancelled, SubscriptionHandle};
use crate::messaging::traits::MessageBroker;
use crate::messaging::types::{ConnectionState, Delivery, QueueBinding};
use server::{NextMessage, StoredMessage};

#[derive(Debug, Clone)]
pub struct InMemoryConnector {
    server: InMemoryBrokerServer,
}

#[async_trait]
impl Connector for InMemoryConnector {
    type Connection = InMemoryConnection;

    async fn open(&self) -> MessagingResult<Established<InMemoryConnection>> {
        let (connection, lost) = self.server.open_connection()?;
        Ok(Established { connection, lost })
    }

    async fn close(&self, connection: InMemoryConnection) {
        self.server.close_connection(connection.id(), "client shutdown");
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}

struct ActiveConsumer {
    queue: String,
    consumer_tag: u64,
    connection: InMemoryConnection,
    generation: u64,
}

struct InMemoryInner {
    server: InMemoryBrokerServer,
    manager: Arc<ConnectionManager<InMemoryConnector>>,
    prefetch_count: u16,
    /// Exchange name -> generation it was declared on.
    channels: ChannelCache<InMemoryConnection>,
}

#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<InMemoryInner>,
}

impl std::fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBroker")
            .field("manager", &self.inner.manager)
            .field("prefetch_count", &self.inner.prefetch_count)
            .field("channels", &self.inner.channels.len())
            .finish()
    }
}

impl InMemoryBroker {
    pub fn new(server: InMemoryBrokerServer, config: &BrokerConfig) -> Self {
        Self::with_prefetch_count(
            server,
            ReconnectBackoff::from(&config.reconnect),
            config.prefetch_count,
        )
    }

    /// Default prefetch window, custom reconnect policy.
    pub fn with_backoff(server: InMemoryBrokerServer, backoff: ReconnectBackoff) -> Self {
        Self::with_prefetch_count(server, backoff, BrokerConfig::default().prefetch_count)
    }

    pub fn with_prefetch_count(
        server: InMemoryBrokerServer,
        backoff: ReconnectBackoff,
        prefetch_count: u16,
    ) -> Self {
        let connector = InMemoryConnector {
            server: server.clone(),
        };
        Self {
            inner: Arc::new(InMemoryInner {
                server,
                manager: ConnectionManager::new(connector, backoff),
                prefetch_count,
                channels: ChannelCache::new(),
            }),
        }
    }

    pub fn prefetch_count(&self) -> u16 {
        self.inner.prefetch_count
    }

    /// Client with a private server, for single-process use.
    pub fn standalone(config: &BrokerConfig) -> Self {
        Self::new(InMemoryBrokerServer::new(), config)
    }

    pub fn server(&self) -> &InMemoryBrokerServer {
        &self.inner.server
    }

    pub fn generation(&self) -> u64 {
        self.inner.manager.generation()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.manager.watch_state()
    }

    async fn channel(&self, exchange: &str) -> MessagingResult<(InMemoryConnection, u64)> {
        let (connection, generation) = self.inner.manager.connect().await?;
        if let Some(cached) = self
            .inner
            .channels
            .get(exchange, generation, InMemoryConnection::is_open)
        {
            return Ok((cached, generation));
        }

        if let Err(err) = self.inner.server.declare_exchange(connection.id(), exchange) {
            self.check_connection(&connection, generation);
            return Err(err);
        }
        debug!(exchange, generation, "Declared in-memory exchange");
        let (connection, _) = self.inner.channels.memoize(
            exchange,
            generation,
            connection,
            InMemoryConnection::is_open,
        );
        Ok((connection, generation))
    }

    fn check_connection(&self, connection: &InMemoryConnection, generation: u64) {
        if !connection.is_open() {
            self.inner
                .manager
                .report_lost(generation, "connection closed during operation");
        }
    }

    async fn start_consumer(
        &self,
        exchange: &str,
        routing_key: &str,
        binding: &QueueBinding,
    ) -> MessagingResult<ActiveConsumer> {
        let (connection, generation) = self.channel(exchange).await?;
        let server = &self.inner.server;

        let queue = server.declare_queue(connection.id(), binding)?;
        server.bind_queue(connection.id(), &queue, exchange, routing_key)?;
        let consumer_tag = server.consume(connection.id(), &queue, self.inner.prefetch_count)?;

        info!(
            exchange,
            routing_key,
            queue = %queue,
            durable = binding.is_durable(),
            prefetch = self.inner.prefetch_count,
            "Subscribed to queue"
        );
        Ok(ActiveConsumer {
            queue,
            consumer_tag,
            connection,
            generation,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn consume_loop(
        self,
        exchange: String,
        routing_key: String,
        binding: QueueBinding,
        handler: Arc<dyn MessageHandler>,
        initial: ActiveConsumer,
        queue_name: Arc<RwLock<String>>,
        mut cancel_rx: watch::Receiver<bool>,
    ) {
        let mut state_rx = self.inner.manager.watch_state();
        let mut shutdown_rx = self.inner.manager.watch_shutdown();
        let retry_delay = self.inner.manager.backoff().initial_delay();
        let mut next = Some(initial);

        loop {
            let active = match next.take() {
                Some(active) => active,
                None => {
                    tokio::select! {
                        connected = wait_until_connected(&mut state_rx, &mut shutdown_rx) => {
                            if !connected {
                                return;
                            }
                        }
                        _ = cancelled(&mut cancel_rx) => return,
                    }
                    match self.start_consumer(&exchange, &routing_key, &binding).await {
                        Ok(active) => {
                            *queue_name.write() = active.queue.clone();
                            active
                        }
                        Err(err) => {
                            warn!(
                                exchange = %exchange,
                                routing_key = %routing_key,
                                error = %err,
                                "Resubscribe failed; retrying"
                            );
                            tokio::select! {
                                _ = tokio::time::sleep(retry_delay) => {}
                                _ = cancelled(&mut cancel_rx) => return,
                            }
                            continue;
                        }
                    }
                }
            };

            self.drain(&active, handler.as_ref(), &mut cancel_rx).await;
            if *cancel_rx.borrow() {
                return;
            }

            self.check_connection(&active.connection, active.generation);
            warn!(
                queue = %active.queue,
                generation = active.generation,
                "Consumer stopped; waiting for connection to resubscribe"
            );
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(10)) => {}
                _ = cancelled(&mut cancel_rx) => return,
            }
        }
    }

    /// Deliver messages until the connection drops, the queue disappears or
    /// the subscription is cancelled. Buffered deliveries the handler never
    /// saw go back to the queue.
    async fn drain(
        &self,
        active: &ActiveConsumer,
        handler: &dyn MessageHandler,
        cancel_rx: &mut watch::Receiver<bool>,
    ) {
        let server = &self.inner.server;
        let mut buffered: VecDeque<(u64, StoredMessage)> = VecDeque::new();

        'consume: loop {
            if *cancel_rx.borrow() {
                break;
            }

            let idle = loop {
                match server.next_message(active.consumer_tag) {
                    Ok(NextMessage::Message { tag, message }) => buffered.push_back((tag, message)),
                    Ok(NextMessage::Empty(notify) | NextMessage::Throttled(notify)) => break notify,
                    Err(err) => {
                        debug!(queue = %active.queue, error = %err, "Consumer detached");
                        break 'consume;
                    }
                }
            };

            let Some((tag, message)) = buffered.pop_front() else {
                tokio::select! {
                    _ = idle.notified() => {}
                    _ = active.connection.closed() => break 'consume,
                    _ = cancelled(cancel_rx) => break 'consume,
                }
                continue;
            };

            let delivery = Delivery {
                exchange: message.exchange,
                routing_key: message.routing_key,
                queue: active.queue.clone(),
                payload: message.payload,
                redelivered: message.redelivered,
                delivery_tag: tag,
            };
            let outcome = dispatch(handler, &delivery).await;
            match server.settle(active.connection.id(), tag, outcome) {
                Ok(()) => debug!(
                    queue = %active.queue,
                    delivery_tag = tag,
                    outcome = ?outcome,
                    "Settled delivery"
                ),
                Err(err) => error!(
                    queue = %active.queue,
                    delivery_tag = tag,
                    outcome = ?outcome,
                    error = %err,
                    "Failed to settle delivery; broker will redeliver it"
                ),
            }
        }

        server.cancel_consumer(active.consumer_tag);
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn connect(&self) -> MessagingResult<()> {
        self.inner.manager.connect().await.map(|_| ())
    }

    async fn ensure_exchange(&self, exchange: &str) -> MessagingResult<()> {
        self.channel(exchange).await.map(|_| ())
    }

    async fn publish<T: QueueMessage>(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &T,
    ) -> MessagingResult<()> {
        let payload = message.to_bytes()?;
        let (connection, generation) = self.channel(exchange).await?;
        let bytes = payload.len();
        match self
            .inner
            .server
            .publish(connection.id(), exchange, routing_key, payload)
        {
            Ok(routed) => {
                debug!(exchange, routing_key, bytes, routed, "Published message");
                Ok(())
            }
            Err(err) => {
                self.check_connection(&connection, generation);
                Err(match err {
                    MessagingError::Publish { .. } => err,
                    other => MessagingError::publish(exchange, routing_key, other.to_string()),
                })
            }
        }
    }

    async fn subscribe(
        &self,
        exchange: &str,
        routing_key: &str,
        binding: QueueBinding,
        handler: Arc<dyn MessageHandler>,
    ) -> MessagingResult<SubscriptionHandle> {
        let active = self.start_consumer(exchange, routing_key, &binding).await?;
        let queue_name = Arc::new(RwLock::new(active.queue.clone()));
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let task = tokio::spawn(self.clone().consume_loop(
            exchange.to_string(),
            routing_key.to_string(),
            binding,
            handler,
            active,
            queue_name.clone(),
            cancel_rx,
        ));
        Ok(SubscriptionHandle::new(queue_name, routing_key, cancel_tx, task))
    }

    fn state(&self) -> ConnectionState {
        self.inner.manager.state()
    }

    async fn health_check(&self) -> MessagingResult<bool> {
        Ok(self
            .inner
            .manager
            .current()
            .is_some_and(|(connection, _)| connection.is_open()))
    }

    async fn shutdown(&self) {
        self.inner.channels.clear();
        self.inner.manager.shutdown().await;
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::handler::handler_fn;
    use crate::messaging::types::HandlerOutcome;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::{mpsc, Semaphore};

    fn broker(server: &InMemoryBrokerServer) -> InMemoryBroker {
        InMemoryBroker::with_backoff(server.clone(), ReconnectBackoff::fixed(Duration::from_secs(5)))
    }

    fn collecting_handler(tx: mpsc::UnboundedSender<Delivery>) -> Arc<dyn MessageHandler> {
        Arc::new(handler_fn(move |delivery: Delivery| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(delivery);
                HandlerOutcome::Ack
            }
        }))
    }

    #[tokio::test]
    async fn channel_is_memoized_per_generation() {
        let server = InMemoryBrokerServer::new();
        let client = broker(&server);

        client.ensure_exchange("post-service").await.unwrap();
        client.ensure_exchange("post-service").await.unwrap();

        assert_eq!(server.connection_count(), 1);
        assert!(server.exchange_exists("post-service"));
        assert_eq!(client.inner.channels.len(), 1);
        assert_eq!(client.generation(), 1);
    }

    #[tokio::test]
    async fn publish_reaches_subscriber_on_other_client() {
        let server = InMemoryBrokerServer::new();
        let producer = broker(&server);
        let consumer = broker(&server);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handle = consumer
            .subscribe(
                "post-service",
                "post.deleted",
                QueueBinding::Ephemeral,
                collecting_handler(tx),
            )
            .await
            .unwrap();
        producer
            .publish("post-service", "post.deleted", &serde_json::json!({"postId": "p1"}))
            .await
            .unwrap();

        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.routing_key, "post.deleted");
        assert_eq!(delivery.exchange, "post-service");
        assert!(!delivery.redelivered);

        handle.shutdown().await;
        tokio::task::yield_now().await;
        assert_eq!(server.stats().acked, 1);
    }

    #[tokio::test]
    async fn publish_without_connection_fails_fast_after_refusal() {
        let server = InMemoryBrokerServer::new();
        server.set_available(false);
        let client = broker(&server);

        let first = client
            .publish("post-service", "post.deleted", &serde_json::json!({}))
            .await;
        assert!(matches!(first, Err(MessagingError::Connection { .. })));

        let second = client
            .publish("post-service", "post.deleted", &serde_json::json!({}))
            .await;
        assert!(matches!(second, Err(MessagingError::NotConnected { .. })));
    }

    #[tokio::test]
    async fn cancelled_subscription_stops_consuming() {
        let server = InMemoryBrokerServer::new();
        let client = broker(&server);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handle = client
            .subscribe(
                "post-service",
                "post.deleted",
                QueueBinding::durable("media"),
                collecting_handler(tx),
            )
            .await
            .unwrap();
        handle.shutdown().await;

        client
            .publish("post-service", "post.deleted", &serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(server.queue_depth("media"), Some(1));
        assert!(rx.try_recv().is_err());
    }

    async fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
    }

    #[tokio::test]
    async fn slow_handler_never_holds_more_than_prefetch() {
        let server = InMemoryBrokerServer::new();
        let producer = broker(&server);
        let consumer = InMemoryBroker::with_prefetch_count(
            server.clone(),
            ReconnectBackoff::fixed(Duration::from_secs(5)),
            3,
        );

        let gate = Arc::new(Semaphore::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let handler: Arc<dyn MessageHandler> = {
            let (gate, peak, server) = (gate.clone(), peak.clone(), server.clone());
            Arc::new(handler_fn(move |_delivery: Delivery| {
                let (gate, peak, server) = (gate.clone(), peak.clone(), server.clone());
                async move {
                    peak.fetch_max(server.unacked_count(), Ordering::SeqCst);
                    if let Ok(permit) = gate.acquire().await {
                        permit.forget();
                    }
                    HandlerOutcome::Ack
                }
            }))
        };

        let handle = consumer
            .subscribe("post-service", "post.deleted", QueueBinding::durable("slow"), handler)
            .await
            .unwrap();
        for n in 0..10 {
            producer
                .publish("post-service", "post.deleted", &serde_json::json!({ "n": n }))
                .await
                .unwrap();
        }

        wait_for("the prefetch window to fill", || server.unacked_count() == 3).await;
        assert_eq!(server.queue_depth("slow"), Some(7));

        gate.add_permits(10);
        wait_for("every message to be acked", || server.stats().acked == 10).await;
        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(server.unacked_count(), 0);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn cancelled_consumer_hands_back_buffered_messages() {
        let server = InMemoryBrokerServer::new();
        let producer = broker(&server);
        let consumer = broker(&server);

        let gate = Arc::new(Semaphore::new(0));
        let handler: Arc<dyn MessageHandler> = {
            let gate = gate.clone();
            Arc::new(handler_fn(move |_delivery: Delivery| {
                let gate = gate.clone();
                async move {
                    if let Ok(permit) = gate.acquire().await {
                        permit.forget();
                    }
                    HandlerOutcome::Ack
                }
            }))
        };
        let handle = consumer
            .subscribe("post-service", "post.deleted", QueueBinding::durable("work"), handler)
            .await
            .unwrap();
        for n in 0..4 {
            producer
                .publish("post-service", "post.deleted", &serde_json::json!({ "n": n }))
                .await
                .unwrap();
        }
        wait_for("the consumer to buffer everything", || server.unacked_count() == 4).await;

        // Let the message in the handler finish so shutdown is not blocked on it
        gate.add_permits(1);
        handle.shutdown().await;

        assert_eq!(server.stats().acked, 1);
        assert_eq!(server.unacked_count(), 0);
        assert_eq!(server.queue_depth("work"), Some(3));
    }
}
