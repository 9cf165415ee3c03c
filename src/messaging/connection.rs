//! # Connection Manager
//!
//! Owns the single broker connection of a client and its reconnect policy.
//!
//! ## Architecture
//!
//! ```text
//!   connect() ──► Connector::open() ──► install() ──► Connected
//!                        │                               │
//!                        │ error                         │ lost signal
//!                        ▼                               ▼
//!               schedule_reconnect() ◄──────────── report_lost()
//!                        │
//!                        ▼
//!        reconnect loop: sleep(backoff) ─► open() ─► install() | retry
//! ```
//!
//! The slot (state, handle, generation) is guarded by a `parking_lot::Mutex`
//! that is never held across an `.await`. Observers follow the state through a
//! `watch` channel. Each successful open bumps the generation so that memoized
//! channels from an earlier connection are recognized as stale. Callers that
//! arrive while a `connect()` open is in flight wait on that channel for its
//! outcome rather than opening a second connection.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

use super::backoff::ReconnectBackoff;
use super::errors::{MessagingError, MessagingResult};
use super::types::ConnectionState;

/// An opened connection plus a signal that fires (or is dropped) when the
/// transport is lost.
pub struct Established<T> {
    pub connection: T,
    pub lost: oneshot::Receiver<String>,
}

/// Transport-specific connection opener.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: Clone + Send + Sync + 'static;

    async fn open(&self) -> MessagingResult<Established<Self::Connection>>;

    async fn close(&self, connection: Self::Connection);

    fn name(&self) -> &'static str;
}

struct Slot<T> {
    state: ConnectionState,
    connection: Option<T>,
    generation: u64,
    reconnect_pending: bool,
    shut_down: bool,
}

pub struct ConnectionManager<C: Connector> {
    connector: C,
    backoff: ReconnectBackoff,
    slot: Mutex<Slot<C::Connection>>,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
}

impl<C: Connector> std::fmt::Debug for ConnectionManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slot = self.slot.lock();
        f.debug_struct("ConnectionManager")
            .field("connector", &self.connector.name())
            .field("state", &slot.state)
            .field("generation", &slot.generation)
            .field("reconnect_pending", &slot.reconnect_pending)
            .finish()
    }
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(connector: C, backoff: ReconnectBackoff) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            connector,
            backoff,
            slot: Mutex::new(Slot {
                state: ConnectionState::Disconnected,
                connection: None,
                generation: 0,
                reconnect_pending: false,
                shut_down: false,
            }),
            state_tx,
            shutdown_tx,
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.slot.lock().state
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn watch_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Generation of the current (or last) connection. Starts at 0, first
    /// successful open is 1.
    pub fn generation(&self) -> u64 {
        self.slot.lock().generation
    }

    pub fn is_shut_down(&self) -> bool {
        self.slot.lock().shut_down
    }

    pub fn backoff(&self) -> &ReconnectBackoff {
        &self.backoff
    }

    /// Current connection if connected, without attempting to open one.
    pub fn current(&self) -> Option<(C::Connection, u64)> {
        let slot = self.slot.lock();
        match (&slot.connection, slot.state) {
            (Some(connection), ConnectionState::Connected) => {
                Some((connection.clone(), slot.generation))
            }
            _ => None,
        }
    }

    /// Return the live connection, opening one if the client is idle.
    ///
    /// Concurrent callers share a single open: while one is in flight the
    /// others wait for its outcome. While a reconnect is scheduled this fails
    /// fast with `NotConnected` instead of racing the reconnect loop. A failed
    /// open schedules the reconnect loop.
    pub async fn connect(self: &Arc<Self>) -> MessagingResult<(C::Connection, u64)> {
        loop {
            let mut in_flight = {
                let mut slot = self.slot.lock();
                if slot.shut_down {
                    return Err(MessagingError::Shutdown);
                }
                if let (ConnectionState::Connected, Some(connection)) =
                    (slot.state, &slot.connection)
                {
                    return Ok((connection.clone(), slot.generation));
                }
                if slot.reconnect_pending {
                    return Err(MessagingError::not_connected(slot.state));
                }
                if slot.state != ConnectionState::Connecting {
                    slot.state = ConnectionState::Connecting;
                    self.state_tx.send_replace(ConnectionState::Connecting);
                    break;
                }
                self.state_tx.subscribe()
            };
            debug!(connector = self.connector.name(), "Waiting for in-flight broker open");
            let _ = in_flight
                .wait_for(|state| *state != ConnectionState::Connecting)
                .await;
        }

        debug!(connector = self.connector.name(), "Opening broker connection");
        let mut opening = OpenInFlight {
            manager: &**self,
            settled: false,
        };
        let result = self.connector.open().await;
        opening.settled = true;

        match result {
            Ok(established) if self.is_shut_down() => {
                self.connector.close(established.connection).await;
                Err(MessagingError::Shutdown)
            }
            Ok(established) => Ok(self.install(established)),
            Err(err) => {
                warn!(
                    connector = self.connector.name(),
                    error = %err,
                    "Broker connection failed; reconnect scheduled"
                );
                self.set_disconnected();
                self.schedule_reconnect();
                Err(err)
            }
        }
    }

    /// Mark a connection generation as lost. Stale generations are ignored.
    pub fn report_lost(self: &Arc<Self>, generation: u64, reason: &str) {
        {
            let mut slot = self.slot.lock();
            if slot.shut_down
                || slot.generation != generation
                || slot.state != ConnectionState::Connected
            {
                return;
            }
            slot.connection = None;
            slot.state = ConnectionState::Disconnected;
            self.state_tx.send_replace(ConnectionState::Disconnected);
        }
        warn!(
            connector = self.connector.name(),
            generation,
            reason,
            "Broker connection lost; reconnect scheduled"
        );
        self.schedule_reconnect();
    }

    /// Stop reconnecting and close the current connection.
    pub async fn shutdown(&self) {
        let connection = {
            let mut slot = self.slot.lock();
            if slot.shut_down {
                return;
            }
            slot.shut_down = true;
            slot.reconnect_pending = false;
            slot.state = ConnectionState::Disconnected;
            slot.connection.take()
        };
        self.shutdown_tx.send_replace(true);
        self.state_tx.send_replace(ConnectionState::Disconnected);
        if let Some(connection) = connection {
            self.connector.close(connection).await;
        }
        info!(connector = self.connector.name(), "Broker client shut down");
    }

    fn install(self: &Arc<Self>, established: Established<C::Connection>) -> (C::Connection, u64) {
        let Established { connection, lost } = established;
        let generation = {
            let mut slot = self.slot.lock();
            slot.generation += 1;
            slot.connection = Some(connection.clone());
            slot.state = ConnectionState::Connected;
            slot.reconnect_pending = false;
            slot.generation
        };
        self.state_tx.send_replace(ConnectionState::Connected);
        info!(
            connector = self.connector.name(),
            generation, "Broker connection established"
        );

        let manager = Arc::downgrade(self);
        tokio::spawn(async move {
            let reason = lost
                .await
                .unwrap_or_else(|_| "connection handle dropped".to_string());
            if let Some(manager) = manager.upgrade() {
                manager.report_lost(generation, &reason);
            }
        });

        (connection, generation)
    }

    fn set_disconnected(&self) {
        let mut slot = self.slot.lock();
        if slot.state != ConnectionState::Connected {
            slot.state = ConnectionState::Disconnected;
            self.state_tx.send_replace(ConnectionState::Disconnected);
        }
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        {
            let mut slot = self.slot.lock();
            if slot.shut_down || slot.reconnect_pending {
                return;
            }
            slot.reconnect_pending = true;
        }
        let shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(Self::reconnect_loop(Arc::downgrade(self), shutdown_rx));
    }

    async fn reconnect_loop(manager: Weak<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        let mut attempt: u32 = 0;
        loop {
            let delay = match manager.upgrade() {
                Some(manager) => manager.backoff.delay_for(attempt),
                None => return,
            };
            debug!(attempt, delay_ms = delay.as_millis() as u64, "Waiting before reconnect");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stopped(&mut shutdown_rx) => return,
            }

            let Some(manager) = manager.upgrade() else {
                return;
            };
            {
                let mut slot = manager.slot.lock();
                if slot.shut_down {
                    return;
                }
                slot.state = ConnectionState::Connecting;
                manager.state_tx.send_replace(ConnectionState::Connecting);
            }

            match manager.connector.open().await {
                Ok(established) => {
                    if manager.is_shut_down() {
                        manager.connector.close(established.connection).await;
                        return;
                    }
                    manager.install(established);
                    info!(
                        connector = manager.connector.name(),
                        attempt, "Broker reconnected"
                    );
                    return;
                }
                Err(err) => {
                    error!(
                        connector = manager.connector.name(),
                        attempt,
                        error = %err,
                        "Broker reconnect attempt failed"
                    );
                    {
                        let mut slot = manager.slot.lock();
                        slot.state = ConnectionState::Disconnected;
                    }
                    manager.state_tx.send_replace(ConnectionState::Disconnected);
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }
}

/// Releases callers waiting on an open whose future was dropped midway
/// (a caller-side timeout, say).
struct OpenInFlight<'a, C: Connector> {
    manager: &'a ConnectionManager<C>,
    settled: bool,
}

impl<C: Connector> Drop for OpenInFlight<'_, C> {
    fn drop(&mut self) {
        if !self.settled {
            self.manager.set_disconnected();
        }
    }
}

/// Wait until the manager reports `Connected`. Returns `false` if the client
/// shut down first.
pub async fn wait_until_connected(
    state_rx: &mut watch::Receiver<ConnectionState>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> bool {
    if *shutdown_rx.borrow() {
        return false;
    }
    let connected = async { state_rx.wait_for(|state| state.is_connected()).await.is_ok() };
    tokio::select! {
        connected = connected => connected,
        _ = stopped(shutdown_rx) => false,
    }
}

/// Resolves once shutdown was signalled or the manager is gone.
async fn stopped(shutdown_rx: &mut watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|stopped| *stopped).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Opens numbered fake connections; refuses while `available` is false.
    struct FakeConnector {
        available: Arc<AtomicBool>,
        open_delay: Option<Duration>,
        opens: Arc<AtomicUsize>,
        lost_senders: Arc<Mutex<Vec<oneshot::Sender<String>>>>,
    }

    impl FakeConnector {
        fn new(available: bool) -> Self {
            Self {
                available: Arc::new(AtomicBool::new(available)),
                open_delay: None,
                opens: Arc::new(AtomicUsize::new(0)),
                lost_senders: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl Connector for FakeConnector {
        type Connection = usize;

        async fn open(&self) -> MessagingResult<Established<usize>> {
            if let Some(delay) = self.open_delay {
                tokio::time::sleep(delay).await;
            }
            if !self.available.load(Ordering::SeqCst) {
                return Err(MessagingError::connection("connection refused"));
            }
            let n = self.opens.fetch_add(1, Ordering::SeqCst) + 1;
            let (tx, rx) = oneshot::channel();
            self.lost_senders.lock().push(tx);
            Ok(Established {
                connection: n,
                lost: rx,
            })
        }

        async fn close(&self, _connection: usize) {}

        fn name(&self) -> &'static str {
            "fake"
        }
    }

    fn manager(connector: FakeConnector) -> Arc<ConnectionManager<FakeConnector>> {
        ConnectionManager::new(connector, ReconnectBackoff::fixed(Duration::from_secs(5)))
    }

    #[tokio::test]
    async fn connect_is_idempotent() {
        let connector = FakeConnector::new(true);
        let opens = connector.opens.clone();
        let manager = manager(connector);

        let (first, generation) = manager.connect().await.unwrap();
        let (second, again) = manager.connect().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(generation, again);
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    fn slow(available: bool) -> FakeConnector {
        FakeConnector {
            open_delay: Some(Duration::from_millis(50)),
            ..FakeConnector::new(available)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_connects_share_one_open() {
        let connector = slow(true);
        let opens = connector.opens.clone();
        let manager = manager(connector);

        let (first, second, third) =
            tokio::join!(manager.connect(), manager.connect(), manager.connect());
        assert_eq!(first.unwrap(), (1, 1));
        assert_eq!(second.unwrap(), (1, 1));
        assert_eq!(third.unwrap(), (1, 1));
        assert_eq!(opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn waiters_on_a_failed_open_fail_fast() {
        let manager = manager(slow(false));

        let (first, second) = tokio::join!(manager.connect(), manager.connect());
        assert!(matches!(first, Err(MessagingError::Connection { .. })));
        assert!(matches!(second, Err(MessagingError::NotConnected { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_open_does_not_strand_the_client() {
        let connector = slow(true);
        let opens = connector.opens.clone();
        let manager = manager(connector);

        let abandoned = tokio::time::timeout(Duration::from_millis(10), manager.connect()).await;
        assert!(abandoned.is_err());
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        assert_eq!(manager.connect().await.unwrap(), (1, 1));
        assert_eq!(opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn lost_connection_reconnects_after_backoff() {
        let connector = FakeConnector::new(true);
        let lost = connector.lost_senders.clone();
        let manager = manager(connector);
        let mut state_rx = manager.watch_state();

        manager.connect().await.unwrap();
        let sender = lost.lock().pop().unwrap();
        sender.send("connection reset".to_string()).unwrap();

        state_rx
            .wait_for(|s| *s == ConnectionState::Disconnected)
            .await
            .unwrap();
        assert!(matches!(
            manager.connect().await,
            Err(MessagingError::NotConnected { .. })
        ));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(manager.generation(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_first_connect_keeps_retrying() {
        let connector = FakeConnector::new(false);
        let available = connector.available.clone();
        let manager = manager(connector);

        assert!(manager.connect().await.is_err());
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        available.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_reconnect() {
        let connector = FakeConnector::new(false);
        let available = connector.available.clone();
        let opens = connector.opens.clone();
        let manager = manager(connector);

        assert!(manager.connect().await.is_err());
        manager.shutdown().await;
        available.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(opens.load(Ordering::SeqCst), 0);
        assert!(matches!(
            manager.connect().await,
            Err(MessagingError::Shutdown)
        ));
    }

    #[tokio::test]
    async fn stale_loss_reports_are_ignored() {
        let manager = manager(FakeConnector::new(true));
        let (_, generation) = manager.connect().await.unwrap();

        manager.report_lost(generation + 7, "old connection");
        assert_eq!(manager.state(), ConnectionState::Connected);
    }
}
