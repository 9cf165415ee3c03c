//! In-process topic broker shared by any number of [`super::InMemoryBroker`]
//! clients.
//!
//! Models the parts of AMQP semantics the consistency core relies on:
//! durable topic exchanges, exclusive server-named queues that vanish with
//! their connection, durable named queues with competing consumers, FIFO per
//! queue, per-consumer prefetch windows, and redelivery (flagged
//! `redelivered`) of messages left unacked by a consumer or connection that
//! went away. Tests drive failures through
//! [`InMemoryBrokerServer::disconnect_all`] and
//! [`InMemoryBrokerServer::set_available`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{oneshot, watch, Notify};
use tracing::{debug, info};
use uuid::Uuid;

use crate::messaging::errors::{MessagingError, MessagingResult};
use crate::messaging::topic::topic_matches;
use crate::messaging::types::{HandlerOutcome, QueueBinding};

/// Client-side view of one server connection.
#[derive(Debug, Clone)]
pub struct InMemoryConnection {
    id: u64,
    open: watch::Receiver<bool>,
}

impl InMemoryConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_open(&self) -> bool {
        *self.open.borrow()
    }

    /// Resolves when the server drops this connection.
    pub async fn closed(&self) {
        let mut open = self.open.clone();
        let _ = open.wait_for(|open| !*open).await;
    }
}

#[derive(Debug, Clone)]
pub(crate) struct StoredMessage {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
    pub redelivered: bool,
}

pub(crate) enum NextMessage {
    Message { tag: u64, message: StoredMessage },
    /// Queue drained; the notify fires on the next publish.
    Empty(Arc<Notify>),
    /// Prefetch window full; the notify fires when a delivery is settled.
    Throttled(Arc<Notify>),
}

/// Counters over the server's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerStats {
    pub published: u64,
    pub routed: u64,
    pub delivered: u64,
    pub acked: u64,
    pub requeued: u64,
    pub rejected: u64,
}

struct ConnectionEntry {
    lost_tx: Option<oneshot::Sender<String>>,
    open_tx: watch::Sender<bool>,
}

struct QueueState {
    durable: bool,
    owner: Option<u64>,
    messages: VecDeque<StoredMessage>,
    notify: Arc<Notify>,
}

impl QueueState {
    fn push(&mut self, message: StoredMessage) {
        self.messages.push_back(message);
        self.notify.notify_one();
    }
}

struct BindingEntry {
    exchange: String,
    queue: String,
    pattern: String,
}

struct ConsumerEntry {
    connection_id: u64,
    queue: String,
    prefetch: usize,
    in_flight: usize,
    notify: Arc<Notify>,
}

struct Unacked {
    connection_id: u64,
    consumer_tag: u64,
    queue: String,
    message: StoredMessage,
}

#[derive(Default)]
struct ServerState {
    available: bool,
    connections: HashMap<u64, ConnectionEntry>,
    exchanges: HashSet<String>,
    queues: HashMap<String, QueueState>,
    bindings: Vec<BindingEntry>,
    consumers: HashMap<u64, ConsumerEntry>,
    unacked: HashMap<u64, Unacked>,
    stats: BrokerStats,
}

impl ServerState {
    fn ensure_open(&self, connection_id: u64) -> MessagingResult<()> {
        if self.connections.contains_key(&connection_id) {
            Ok(())
        } else {
            Err(MessagingError::connection(format!(
                "in-memory connection {connection_id} is closed"
            )))
        }
    }

    /// Put the unacked deliveries selected by `pred` back at the head of their
    /// queues, flagged redelivered, in original delivery order.
    fn requeue_unacked(&mut self, pred: impl Fn(&Unacked) -> bool) -> u64 {
        let mut tags: Vec<u64> = self
            .unacked
            .iter()
            .filter(|(_, u)| pred(u))
            .map(|(tag, _)| *tag)
            .collect();
        tags.sort_unstable();

        let mut requeued = 0u64;
        for tag in tags.into_iter().rev() {
            let Some(unacked) = self.unacked.remove(&tag) else {
                continue;
            };
            if let Some(consumer) = self.consumers.get_mut(&unacked.consumer_tag) {
                consumer.in_flight = consumer.in_flight.saturating_sub(1);
            }
            if let Some(queue) = self.queues.get_mut(&unacked.queue) {
                let mut message = unacked.message;
                message.redelivered = true;
                queue.messages.push_front(message);
                queue.notify.notify_one();
                requeued += 1;
            }
        }
        self.stats.requeued += requeued;
        requeued
    }
}

struct ServerInner {
    state: Mutex<ServerState>,
    next_connection_id: AtomicU64,
    next_consumer_tag: AtomicU64,
    next_delivery_tag: AtomicU64,
}

#[derive(Clone)]
pub struct InMemoryBrokerServer {
    inner: Arc<ServerInner>,
}

impl Default for InMemoryBrokerServer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryBrokerServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("InMemoryBrokerServer")
            .field("available", &state.available)
            .field("connections", &state.connections.len())
            .field("queues", &state.queues.len())
            .finish()
    }
}

impl InMemoryBrokerServer {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ServerInner {
                state: Mutex::new(ServerState {
                    available: true,
                    ..ServerState::default()
                }),
                next_connection_id: AtomicU64::new(1),
                next_consumer_tag: AtomicU64::new(1),
                next_delivery_tag: AtomicU64::new(1),
            }),
        }
    }

    /// While unavailable, new connections are refused. Existing connections
    /// are unaffected; combine with [`Self::disconnect_all`] to simulate an
    /// outage.
    pub fn set_available(&self, available: bool) {
        self.inner.state.lock().available = available;
        info!(available, "In-memory broker availability changed");
    }

    /// Drop every client connection as a broker restart would.
    pub fn disconnect_all(&self, reason: &str) -> usize {
        let ids: Vec<u64> = self.inner.state.lock().connections.keys().copied().collect();
        for id in &ids {
            self.close_connection(*id, reason);
        }
        ids.len()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.state.lock().connections.len()
    }

    pub fn exchange_exists(&self, exchange: &str) -> bool {
        self.inner.state.lock().exchanges.contains(exchange)
    }

    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.state.lock().queues.keys().cloned().collect();
        names.sort();
        names
    }

    /// Ready (not yet delivered) messages in `queue`.
    pub fn queue_depth(&self, queue: &str) -> Option<usize> {
        self.inner
            .state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.messages.len())
    }

    pub fn unacked_count(&self) -> usize {
        self.inner.state.lock().unacked.len()
    }

    pub fn consumer_count(&self) -> usize {
        self.inner.state.lock().consumers.len()
    }

    pub fn stats(&self) -> BrokerStats {
        self.inner.state.lock().stats
    }

    pub(crate) fn open_connection(
        &self,
    ) -> MessagingResult<(InMemoryConnection, oneshot::Receiver<String>)> {
        let mut state = self.inner.state.lock();
        if !state.available {
            return Err(MessagingError::connection("in-memory broker refused connection"));
        }
        let id = self.inner.next_connection_id.fetch_add(1, Ordering::SeqCst);
        let (lost_tx, lost_rx) = oneshot::channel();
        let (open_tx, open_rx) = watch::channel(true);
        state.connections.insert(
            id,
            ConnectionEntry {
                lost_tx: Some(lost_tx),
                open_tx,
            },
        );
        debug!(connection_id = id, "In-memory connection opened");
        Ok((InMemoryConnection { id, open: open_rx }, lost_rx))
    }

    /// Close a connection: exclusive queues it owns are deleted and its
    /// unacked messages on surviving queues go back to the queue head.
    pub(crate) fn close_connection(&self, connection_id: u64, reason: &str) {
        let mut state = self.inner.state.lock();
        let Some(mut entry) = state.connections.remove(&connection_id) else {
            return;
        };

        let owned: Vec<String> = state
            .queues
            .iter()
            .filter(|(_, q)| q.owner == Some(connection_id))
            .map(|(name, _)| name.clone())
            .collect();
        for name in &owned {
            if let Some(queue) = state.queues.remove(name) {
                queue.notify.notify_waiters();
            }
        }
        state.bindings.retain(|b| !owned.contains(&b.queue));

        let requeued = state.requeue_unacked(|u| u.connection_id == connection_id);
        state.consumers.retain(|_, c| c.connection_id != connection_id);
        drop(state);

        entry.open_tx.send_replace(false);
        if let Some(lost_tx) = entry.lost_tx.take() {
            let _ = lost_tx.send(reason.to_string());
        }
        debug!(
            connection_id,
            reason,
            deleted_queues = owned.len(),
            requeued,
            "In-memory connection closed"
        );
    }

    pub(crate) fn declare_exchange(&self, connection_id: u64, exchange: &str) -> MessagingResult<()> {
        let mut state = self.inner.state.lock();
        state.ensure_open(connection_id)?;
        state.exchanges.insert(exchange.to_string());
        Ok(())
    }

    pub(crate) fn declare_queue(
        &self,
        connection_id: u64,
        binding: &QueueBinding,
    ) -> MessagingResult<String> {
        let mut state = self.inner.state.lock();
        state.ensure_open(connection_id)?;
        match binding {
            QueueBinding::Ephemeral => {
                let name = format!("amq.gen-{}", Uuid::new_v4().simple());
                state.queues.insert(
                    name.clone(),
                    QueueState {
                        durable: false,
                        owner: Some(connection_id),
                        messages: VecDeque::new(),
                        notify: Arc::new(Notify::new()),
                    },
                );
                Ok(name)
            }
            QueueBinding::Durable(name) => {
                if let Some(existing) = state.queues.get(name) {
                    if !existing.durable {
                        return Err(MessagingError::topology(
                            format!("queue {name}"),
                            "already declared as exclusive",
                        ));
                    }
                    return Ok(name.clone());
                }
                state.queues.insert(
                    name.clone(),
                    QueueState {
                        durable: true,
                        owner: None,
                        messages: VecDeque::new(),
                        notify: Arc::new(Notify::new()),
                    },
                );
                Ok(name.clone())
            }
        }
    }

    pub(crate) fn bind_queue(
        &self,
        connection_id: u64,
        queue: &str,
        exchange: &str,
        pattern: &str,
    ) -> MessagingResult<()> {
        let mut state = self.inner.state.lock();
        state.ensure_open(connection_id)?;
        if !state.exchanges.contains(exchange) {
            return Err(MessagingError::topology(
                format!("exchange {exchange}"),
                "not found",
            ));
        }
        if !state.queues.contains_key(queue) {
            return Err(MessagingError::topology(format!("queue {queue}"), "not found"));
        }
        let duplicate = state
            .bindings
            .iter()
            .any(|b| b.exchange == exchange && b.queue == queue && b.pattern == pattern);
        if !duplicate {
            state.bindings.push(BindingEntry {
                exchange: exchange.to_string(),
                queue: queue.to_string(),
                pattern: pattern.to_string(),
            });
        }
        Ok(())
    }

    /// Route a message to every matching queue. Unroutable messages are
    /// dropped, as AMQP does for non-mandatory publishes.
    pub(crate) fn publish(
        &self,
        connection_id: u64,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
    ) -> MessagingResult<usize> {
        let mut state = self.inner.state.lock();
        state.ensure_open(connection_id)?;
        if !state.exchanges.contains(exchange) {
            return Err(MessagingError::publish(exchange, routing_key, "exchange not found"));
        }

        let targets: Vec<String> = state
            .bindings
            .iter()
            .filter(|b| b.exchange == exchange && topic_matches(&b.pattern, routing_key))
            .map(|b| b.queue.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        for queue in &targets {
            if let Some(queue) = state.queues.get_mut(queue) {
                queue.push(StoredMessage {
                    exchange: exchange.to_string(),
                    routing_key: routing_key.to_string(),
                    payload: payload.clone(),
                    redelivered: false,
                });
            }
        }
        state.stats.published += 1;
        state.stats.routed += targets.len() as u64;
        Ok(targets.len())
    }

    /// Start consuming `queue`. At most `prefetch` deliveries to this consumer
    /// may be unacked at once; 0 means unlimited.
    pub(crate) fn consume(
        &self,
        connection_id: u64,
        queue: &str,
        prefetch: u16,
    ) -> MessagingResult<u64> {
        let mut state = self.inner.state.lock();
        state.ensure_open(connection_id)?;
        if !state.queues.contains_key(queue) {
            return Err(MessagingError::consume(queue, "queue not found"));
        }
        let tag = self.inner.next_consumer_tag.fetch_add(1, Ordering::SeqCst);
        state.consumers.insert(
            tag,
            ConsumerEntry {
                connection_id,
                queue: queue.to_string(),
                prefetch: if prefetch == 0 {
                    usize::MAX
                } else {
                    usize::from(prefetch)
                },
                in_flight: 0,
                notify: Arc::new(Notify::new()),
            },
        );
        debug!(connection_id, consumer_tag = tag, queue, prefetch, "Consumer registered");
        Ok(tag)
    }

    /// Stop a consumer; deliveries it still holds unacked are requeued.
    pub(crate) fn cancel_consumer(&self, consumer_tag: u64) {
        let mut state = self.inner.state.lock();
        if state.consumers.remove(&consumer_tag).is_none() {
            return;
        }
        let requeued = state.requeue_unacked(|u| u.consumer_tag == consumer_tag);
        debug!(consumer_tag, requeued, "Consumer cancelled");
    }

    pub(crate) fn next_message(&self, consumer_tag: u64) -> MessagingResult<NextMessage> {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        let consumer = state
            .consumers
            .get_mut(&consumer_tag)
            .ok_or_else(|| MessagingError::consume("unknown", "consumer cancelled"))?;
        if !state.connections.contains_key(&consumer.connection_id) {
            return Err(MessagingError::connection(format!(
                "in-memory connection {} is closed",
                consumer.connection_id
            )));
        }
        if consumer.in_flight >= consumer.prefetch {
            return Ok(NextMessage::Throttled(consumer.notify.clone()));
        }

        let queue_state = state
            .queues
            .get_mut(&consumer.queue)
            .ok_or_else(|| MessagingError::consume(&consumer.queue, "queue deleted"))?;
        let Some(message) = queue_state.messages.pop_front() else {
            return Ok(NextMessage::Empty(queue_state.notify.clone()));
        };

        let tag = self.inner.next_delivery_tag.fetch_add(1, Ordering::SeqCst);
        consumer.in_flight += 1;
        state.unacked.insert(
            tag,
            Unacked {
                connection_id: consumer.connection_id,
                consumer_tag,
                queue: consumer.queue.clone(),
                message: message.clone(),
            },
        );
        state.stats.delivered += 1;
        Ok(NextMessage::Message { tag, message })
    }

    pub(crate) fn settle(
        &self,
        connection_id: u64,
        tag: u64,
        outcome: HandlerOutcome,
    ) -> MessagingResult<()> {
        let mut state = self.inner.state.lock();
        state.ensure_open(connection_id)?;
        let owned_by_caller = state
            .unacked
            .get(&tag)
            .is_some_and(|u| u.connection_id == connection_id);
        let unacked = if owned_by_caller {
            state.unacked.remove(&tag)
        } else {
            None
        };
        let Some(unacked) = unacked else {
            return Err(MessagingError::acknowledgement(
                "unknown",
                tag,
                "unknown delivery tag",
            ));
        };
        if let Some(consumer) = state.consumers.get_mut(&unacked.consumer_tag) {
            consumer.in_flight = consumer.in_flight.saturating_sub(1);
            consumer.notify.notify_one();
        }

        match outcome {
            HandlerOutcome::Ack => state.stats.acked += 1,
            HandlerOutcome::Reject => state.stats.rejected += 1,
            HandlerOutcome::Requeue => {
                state.stats.requeued += 1;
                if let Some(queue) = state.queues.get_mut(&unacked.queue) {
                    let mut message = unacked.message;
                    message.redelivered = true;
                    queue.messages.push_front(message);
                    queue.notify.notify_one();
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected(server: &InMemoryBrokerServer) -> InMemoryConnection {
        server.open_connection().unwrap().0
    }

    #[test]
    fn routes_by_topic_pattern() {
        let server = InMemoryBrokerServer::new();
        let conn = connected(&server);
        server.declare_exchange(conn.id(), "post-service").unwrap();
        let deleted = server
            .declare_queue(conn.id(), &QueueBinding::durable("deleted"))
            .unwrap();
        let all = server
            .declare_queue(conn.id(), &QueueBinding::durable("all"))
            .unwrap();
        server
            .bind_queue(conn.id(), &deleted, "post-service", "post.deleted")
            .unwrap();
        server.bind_queue(conn.id(), &all, "post-service", "post.*").unwrap();

        assert_eq!(
            server
                .publish(conn.id(), "post-service", "post.deleted", b"1".to_vec())
                .unwrap(),
            2
        );
        assert_eq!(
            server
                .publish(conn.id(), "post-service", "post.created", b"2".to_vec())
                .unwrap(),
            1
        );
        assert_eq!(server.queue_depth("deleted"), Some(1));
        assert_eq!(server.queue_depth("all"), Some(2));
    }

    #[test]
    fn publish_to_undeclared_exchange_fails() {
        let server = InMemoryBrokerServer::new();
        let conn = connected(&server);
        let err = server
            .publish(conn.id(), "missing", "post.deleted", Vec::new())
            .unwrap_err();
        assert!(matches!(err, MessagingError::Publish { .. }));
    }

    #[test]
    fn closing_connection_requeues_unacked_and_drops_exclusive_queues() {
        let server = InMemoryBrokerServer::new();
        let conn = connected(&server);
        server.declare_exchange(conn.id(), "x").unwrap();
        let durable = server
            .declare_queue(conn.id(), &QueueBinding::durable("work"))
            .unwrap();
        let exclusive = server.declare_queue(conn.id(), &QueueBinding::Ephemeral).unwrap();
        server.bind_queue(conn.id(), &durable, "x", "#").unwrap();
        server.bind_queue(conn.id(), &exclusive, "x", "#").unwrap();
        server.publish(conn.id(), "x", "a", b"m".to_vec()).unwrap();

        let consumer = server.consume(conn.id(), &durable, 10).unwrap();
        let NextMessage::Message { message, .. } = server.next_message(consumer).unwrap() else {
            panic!("expected a message");
        };
        assert!(!message.redelivered);
        assert_eq!(server.unacked_count(), 1);

        server.close_connection(conn.id(), "test");
        assert!(!conn.is_open());
        assert_eq!(server.unacked_count(), 0);
        assert_eq!(server.queue_names(), vec!["work".to_string()]);
        assert_eq!(server.consumer_count(), 0);
        assert!(server.next_message(consumer).is_err());

        let again = connected(&server);
        let consumer = server.consume(again.id(), "work", 10).unwrap();
        let NextMessage::Message { message, .. } = server.next_message(consumer).unwrap() else {
            panic!("expected a redelivery");
        };
        assert!(message.redelivered);
    }

    #[test]
    fn refuses_connections_while_unavailable() {
        let server = InMemoryBrokerServer::new();
        server.set_available(false);
        assert!(server.open_connection().is_err());
        server.set_available(true);
        assert!(server.open_connection().is_ok());
    }

    #[test]
    fn settle_counts_outcomes() {
        let server = InMemoryBrokerServer::new();
        let conn = connected(&server);
        server.declare_exchange(conn.id(), "x").unwrap();
        server.declare_queue(conn.id(), &QueueBinding::durable("q")).unwrap();
        server.bind_queue(conn.id(), "q", "x", "k").unwrap();
        server.publish(conn.id(), "x", "k", b"1".to_vec()).unwrap();
        let consumer = server.consume(conn.id(), "q", 10).unwrap();

        let NextMessage::Message { tag, .. } = server.next_message(consumer).unwrap() else {
            panic!("expected a message");
        };
        server.settle(conn.id(), tag, HandlerOutcome::Requeue).unwrap();
        assert_eq!(server.queue_depth("q"), Some(1));

        let NextMessage::Message { tag, .. } = server.next_message(consumer).unwrap() else {
            panic!("expected a message");
        };
        server.settle(conn.id(), tag, HandlerOutcome::Ack).unwrap();
        assert!(server.settle(conn.id(), tag, HandlerOutcome::Ack).is_err());

        let stats = server.stats();
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.requeued, 1);
        assert_eq!(stats.acked, 1);
    }

    fn queue_with(server: &InMemoryBrokerServer, conn: &InMemoryConnection, count: u8) {
        server.declare_exchange(conn.id(), "x").unwrap();
        server.declare_queue(conn.id(), &QueueBinding::durable("q")).unwrap();
        server.bind_queue(conn.id(), "q", "x", "k").unwrap();
        for n in 0..count {
            server.publish(conn.id(), "x", "k", vec![n]).unwrap();
        }
    }

    #[test]
    fn prefetch_window_bounds_unacked_deliveries() {
        let server = InMemoryBrokerServer::new();
        let conn = connected(&server);
        queue_with(&server, &conn, 3);
        let consumer = server.consume(conn.id(), "q", 2).unwrap();

        let mut tags = Vec::new();
        for _ in 0..2 {
            let NextMessage::Message { tag, .. } = server.next_message(consumer).unwrap() else {
                panic!("expected a message");
            };
            tags.push(tag);
        }
        assert!(matches!(
            server.next_message(consumer).unwrap(),
            NextMessage::Throttled(_)
        ));
        assert_eq!(server.unacked_count(), 2);
        assert_eq!(server.queue_depth("q"), Some(1));

        server.settle(conn.id(), tags[0], HandlerOutcome::Ack).unwrap();
        let NextMessage::Message { message, .. } = server.next_message(consumer).unwrap() else {
            panic!("expected the window to reopen");
        };
        assert_eq!(message.payload, vec![2]);
    }

    #[test]
    fn zero_prefetch_is_unlimited() {
        let server = InMemoryBrokerServer::new();
        let conn = connected(&server);
        queue_with(&server, &conn, 5);
        let consumer = server.consume(conn.id(), "q", 0).unwrap();

        for _ in 0..5 {
            assert!(matches!(
                server.next_message(consumer).unwrap(),
                NextMessage::Message { .. }
            ));
        }
        assert!(matches!(
            server.next_message(consumer).unwrap(),
            NextMessage::Empty(_)
        ));
    }

    #[test]
    fn cancelled_consumer_returns_its_window_in_order() {
        let server = InMemoryBrokerServer::new();
        let conn = connected(&server);
        queue_with(&server, &conn, 3);
        let consumer = server.consume(conn.id(), "q", 2).unwrap();
        server.next_message(consumer).unwrap();
        server.next_message(consumer).unwrap();

        server.cancel_consumer(consumer);
        assert_eq!(server.unacked_count(), 0);
        assert_eq!(server.consumer_count(), 0);
        assert_eq!(server.queue_depth("q"), Some(3));
        assert_eq!(server.stats().requeued, 2);

        let next = server.consume(conn.id(), "q", 1).unwrap();
        let NextMessage::Message { message, .. } = server.next_message(next).unwrap() else {
            panic!("expected a redelivery");
        };
        assert_eq!(message.payload, vec![0]);
        assert!(message.redelivered);
    }
}
