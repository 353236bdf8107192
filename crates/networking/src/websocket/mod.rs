//! Self-healing realtime connection
//!
//! A [`ConnectionManager`] owns at most one live socket to one endpoint. A
//! background task opens it, pumps frames in both directions, and reopens it
//! with capped exponential backoff whenever it drops. Callers observe the
//! connection state and the latest inbound frame through watch channels.

mod backoff;
mod transport;

pub use backoff::ReconnectPolicy;
pub use transport::{Connector, Socket, SocketEvent, TungsteniteConnector};

use chrono::Utc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use stoat_core::{ConnectionState, Error, InboundMessage, RetryState};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// State shared between the handle and the connection task.
///
/// Every mutation goes through a watch update closure that re-checks the
/// cancellation token, so nothing is published once `dispose()` has run.
struct Shared {
    state_tx: watch::Sender<ConnectionState>,
    message_tx: watch::Sender<Option<InboundMessage>>,
    attempt: AtomicU32,
    cancel: CancellationToken,
}

impl Shared {
    fn set_state(&self, next: ConnectionState) -> bool {
        self.state_tx.send_if_modified(|current| {
            if self.cancel.is_cancelled() || *current == next {
                return false;
            }
            if !current.can_transition_to(next) {
                warn!("Ignoring illegal connection transition {:?} -> {:?}", current, next);
                return false;
            }
            *current = next;
            true
        })
    }

    fn deliver(&self, message: InboundMessage) {
        self.message_tx.send_if_modified(|slot| {
            if self.cancel.is_cancelled() {
                return false;
            }
            *slot = Some(message);
            true
        });
    }

    fn record_retry(&self, retry: &RetryState) {
        self.attempt.store(retry.attempt, Ordering::Relaxed);
    }
}

/// Owns one realtime connection for the lifetime of a view.
///
/// Dropping the manager disposes it.
pub struct ConnectionManager {
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    outbound_tx: mpsc::UnboundedSender<String>,
    /// Taken by the first `connect()`; `None` afterwards
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Create an idle manager. Nothing happens until [`connect`](Self::connect).
    pub fn new(connector: impl Connector, policy: ReconnectPolicy) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);
        let (message_tx, _) = watch::channel(None);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        Self {
            shared: Arc::new(Shared {
                state_tx,
                message_tx,
                attempt: AtomicU32::new(0),
                cancel: CancellationToken::new(),
            }),
            connector: Arc::new(connector),
            policy,
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            task: Mutex::new(None),
        }
    }

    /// Manager using tokio-tungstenite and the default 1s..30s backoff
    pub fn websocket() -> Self {
        Self::new(TungsteniteConnector, ReconnectPolicy::default())
    }

    /// Start connecting to `url`.
    ///
    /// Idempotent: once started (or disposed) further calls are ignored.
    /// Never fails; connection errors feed the reconnect cycle.
    /// Must be called from within a tokio runtime.
    pub fn connect(&self, url: impl Into<String>) {
        let url = url.into();

        if self.shared.cancel.is_cancelled() {
            debug!("connect({}) after dispose ignored", url);
            return;
        }

        let outbound_rx = match self.outbound_rx.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        let Some(outbound_rx) = outbound_rx else {
            debug!("connect({}) ignored, connection already started", url);
            return;
        };

        info!("Starting realtime connection to {}", url);

        let task = tokio::spawn(run_connection(
            url,
            self.connector.clone(),
            self.policy,
            self.shared.clone(),
            outbound_rx,
        ));

        if let Ok(mut slot) = self.task.lock() {
            *slot = Some(task);
        }
    }

    /// Queue a text frame. Only accepted while connected; otherwise the frame
    /// is dropped and `false` is returned.
    pub fn send(&self, data: impl Into<String>) -> bool {
        if self.shared.cancel.is_cancelled() || !self.state().is_connected() {
            debug!("send() while not connected, frame dropped");
            return false;
        }
        self.outbound_tx.send(data.into()).is_ok()
    }

    /// Tear down: cancel any pending reconnect, close the active socket, and
    /// stop reconnecting. Safe to call repeatedly and at any point.
    pub fn dispose(&self) {
        if self.shared.cancel.is_cancelled() {
            return;
        }
        self.shared.cancel.cancel();
        self.shared.state_tx.send_replace(ConnectionState::Disconnected);
        debug!("Realtime connection disposed");
    }

    /// Dispose and wait for the background task to finish closing the socket
    pub async fn shutdown(self) {
        self.dispose();
        let task = self.task.lock().ok().and_then(|mut slot| slot.take());
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Realtime connection task ended abnormally: {}", e);
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// The most recent frame; older ones are overwritten
    pub fn latest_message(&self) -> Option<InboundMessage> {
        self.shared.message_tx.borrow().clone()
    }

    pub fn subscribe_messages(&self) -> watch::Receiver<Option<InboundMessage>> {
        self.shared.message_tx.subscribe()
    }

    /// Failed attempts since the last successful open
    pub fn retry_attempt(&self) -> u32 {
        self.shared.attempt.load(Ordering::Relaxed)
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Connection task: open, pump until closed, back off, repeat.
async fn run_connection(
    url: String,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    shared: Arc<Shared>,
    mut outbound: mpsc::UnboundedReceiver<String>,
) {
    let mut retry = RetryState::default();
    let mut seq: u64 = 0;

    loop {
        let opened = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            res = tokio::time::timeout(policy.connect_timeout(), connector.connect(&url)) => {
                res.unwrap_or_else(|_| {
                    Err(Error::WebSocketError(format!(
                        "handshake timed out after {}ms",
                        policy.connect_timeout().as_millis()
                    )))
                })
            }
        };

        match opened {
            Ok(mut socket) => {
                if shared.cancel.is_cancelled() {
                    socket.close().await;
                    break;
                }

                retry.reset();
                shared.record_retry(&retry);

                // Frames accepted for a previous socket are never replayed
                while outbound.try_recv().is_ok() {}

                shared.set_state(ConnectionState::Connected);
                info!("Realtime connection open: {}", url);

                let disposed = pump(socket.as_mut(), &shared, &mut outbound, &mut seq).await;
                if disposed {
                    socket.close().await;
                    break;
                }
            }
            Err(e) => debug!("Realtime connect to {} failed: {}", url, e),
        }

        if shared.cancel.is_cancelled() {
            break;
        }

        let attempt = retry.record_failure();
        shared.record_retry(&retry);
        let delay = policy.delay_for(attempt);

        shared.set_state(ConnectionState::Reconnecting);
        info!(
            "Realtime connection lost, reconnect attempt {} in {}ms",
            attempt + 1,
            delay.as_millis()
        );

        tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    debug!("Realtime connection task for {} exiting", url);
}

/// Move frames until the socket closes (`false`) or the manager is
/// disposed (`true`).
async fn pump(
    socket: &mut dyn Socket,
    shared: &Shared,
    outbound: &mut mpsc::UnboundedReceiver<String>,
    seq: &mut u64,
) -> bool {
    loop {
        tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => return true,
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = socket.send(frame).await {
                        // The close that follows drives reconnection
                        debug!("Realtime send failed: {}", e);
                    }
                }
                None => return true,
            },
            event = socket.next_event() => match event {
                SocketEvent::Message(payload) => {
                    *seq += 1;
                    shared.deliver(InboundMessage {
                        seq: *seq,
                        payload,
                        received_at: Utc::now(),
                    });
                }
                SocketEvent::Error(e) => debug!("Realtime socket error: {}", e),
                SocketEvent::Closed => return false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;
    use stoat_core::Result;
    use tokio::sync::oneshot;
    use tokio::time::Instant;

    struct Attempt {
        url: String,
        respond: oneshot::Sender<Result<Box<dyn Socket>>>,
    }

    impl Attempt {
        fn refuse(self) {
            let _ = self.respond.send(Err(Error::WebSocketError("refused".into())));
        }

        fn accept(self) -> Remote {
            let (socket, remote) = socket_pair();
            let _ = self.respond.send(Ok(socket));
            remote
        }
    }

    /// Hands every connect() to the test, which decides the outcome
    struct TestConnector {
        attempts: mpsc::UnboundedSender<Attempt>,
    }

    #[async_trait]
    impl Connector for TestConnector {
        async fn connect(&self, url: &str) -> Result<Box<dyn Socket>> {
            let (respond, outcome) = oneshot::channel();
            self.attempts
                .send(Attempt {
                    url: url.to_string(),
                    respond,
                })
                .map_err(|_| Error::WebSocketError("test finished".into()))?;
            outcome
                .await
                .unwrap_or_else(|_| Err(Error::WebSocketError("dropped".into())))
        }
    }

    struct TestSocket {
        events: mpsc::UnboundedReceiver<SocketEvent>,
        sent: mpsc::UnboundedSender<String>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Socket for TestSocket {
        async fn send(&mut self, frame: String) -> Result<()> {
            self.sent
                .send(frame)
                .map_err(|_| Error::WebSocketError("peer gone".into()))
        }

        async fn next_event(&mut self) -> SocketEvent {
            self.events.recv().await.unwrap_or(SocketEvent::Closed)
        }

        async fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    /// Server side of a test socket
    struct Remote {
        events: mpsc::UnboundedSender<SocketEvent>,
        sent: mpsc::UnboundedReceiver<String>,
        closed: Arc<AtomicBool>,
    }

    impl Remote {
        fn push(&self, event: SocketEvent) {
            let _ = self.events.send(event);
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    fn socket_pair() -> (Box<dyn Socket>, Remote) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        (
            Box::new(TestSocket {
                events: events_rx,
                sent: sent_tx,
                closed: closed.clone(),
            }),
            Remote {
                events: events_tx,
                sent: sent_rx,
                closed,
            },
        )
    }

    fn manager() -> (ConnectionManager, mpsc::UnboundedReceiver<Attempt>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = ConnectionManager::new(
            TestConnector { attempts: tx },
            ReconnectPolicy::default(),
        );
        (manager, rx)
    }

    fn assert_waited(waited: Duration, expected_ms: u64) {
        let expected = Duration::from_millis(expected_ms);
        assert!(
            waited >= expected && waited <= expected + Duration::from_millis(1),
            "waited {:?}, expected {:?}",
            waited,
            expected
        );
    }

    async fn wait_for_state(manager: &ConnectionManager, state: ConnectionState) {
        let mut rx = manager.subscribe_state();
        rx.wait_for(|s| *s == state).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_doubles_caps_and_resets_after_open() {
        let (manager, mut attempts) = manager();
        manager.connect("ws://test/ws");

        let first = attempts.recv().await.unwrap();
        assert_eq!(first.url, "ws://test/ws");
        let mut last = Instant::now();
        first.refuse();

        for expected_ms in [1_000u64, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000] {
            let attempt = attempts.recv().await.unwrap();
            assert_waited(Instant::now() - last, expected_ms);
            last = Instant::now();
            attempt.refuse();
        }

        let ninth = attempts.recv().await.unwrap();
        assert_eq!(manager.retry_attempt(), 8);
        let remote = ninth.accept();
        wait_for_state(&manager, ConnectionState::Connected).await;
        assert_eq!(manager.retry_attempt(), 0);

        let closed_at = Instant::now();
        remote.push(SocketEvent::Closed);
        let attempt = attempts.recv().await.unwrap();
        assert_waited(Instant::now() - closed_at, 1_000);
        attempt.refuse();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_handshake_times_out_into_backoff() {
        let (manager, mut attempts) = manager();
        manager.connect("ws://test/ws");

        let started = Instant::now();
        // Never answered: the connector stays pending until the timeout drops it
        let _stalled = attempts.recv().await.unwrap();

        wait_for_state(&manager, ConnectionState::Reconnecting).await;
        assert_waited(Instant::now() - started, 10_000);
        assert_eq!(manager.retry_attempt(), 1);

        let next = attempts.recv().await.unwrap();
        assert_waited(Instant::now() - started, 11_000);
        let _remote = next.accept();
        wait_for_state(&manager, ConnectionState::Connected).await;
        assert_eq!(manager.retry_attempt(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_during_backoff_prevents_reconnect() {
        let (manager, mut attempts) = manager();
        manager.connect("ws://test/ws");

        attempts.recv().await.unwrap().refuse();
        wait_for_state(&manager, ConnectionState::Reconnecting).await;

        manager.dispose();
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(attempts.try_recv().is_err());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_while_connecting_discards_late_socket() {
        let (manager, mut attempts) = manager();
        manager.connect("ws://test/ws");

        let pending = attempts.recv().await.unwrap();
        manager.dispose();
        tokio::time::sleep(Duration::from_millis(10)).await;

        // The connect future was dropped, so the late socket has nowhere to go
        let (socket, remote) = socket_pair();
        assert!(pending.respond.send(Ok(socket)).is_err());
        drop(remote);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(attempts.try_recv().is_err());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_closes_socket_and_is_idempotent() {
        let (manager, mut attempts) = manager();
        manager.connect("ws://test/ws");

        let remote = attempts.recv().await.unwrap().accept();
        wait_for_state(&manager, ConnectionState::Connected).await;

        manager.dispose();
        manager.dispose();
        manager.shutdown().await;

        assert!(remote.is_closed());
        assert!(attempts.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_idempotent() {
        let (manager, mut attempts) = manager();
        manager.connect("ws://test/ws");
        manager.connect("ws://test/ws");
        manager.connect("ws://other/ws");

        let _remote = attempts.recv().await.unwrap().accept();
        wait_for_state(&manager, ConnectionState::Connected).await;

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(attempts.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_only_while_connected() {
        let (manager, mut attempts) = manager();
        assert!(!manager.send("too early"));

        manager.connect("ws://test/ws");
        let mut remote = attempts.recv().await.unwrap().accept();
        wait_for_state(&manager, ConnectionState::Connected).await;

        assert!(manager.send("hello"));
        assert_eq!(remote.sent.recv().await.as_deref(), Some("hello"));

        remote.push(SocketEvent::Closed);
        wait_for_state(&manager, ConnectionState::Reconnecting).await;
        assert!(!manager.send("lost"));

        manager.dispose();
        assert!(!manager.send("after dispose"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_latest_message_overwrites() {
        let (manager, mut attempts) = manager();
        manager.connect("ws://test/ws");
        let remote = attempts.recv().await.unwrap().accept();
        wait_for_state(&manager, ConnectionState::Connected).await;

        for payload in ["a", "b", "c"] {
            remote.push(SocketEvent::Message(payload.to_string()));
        }

        let mut messages = manager.subscribe_messages();
        messages
            .wait_for(|m| m.as_ref().map(|m| m.seq) == Some(3))
            .await
            .unwrap();

        let latest = manager.latest_message().unwrap();
        assert_eq!(latest.payload, "c");
        assert_eq!(latest.seq, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_waits_for_close_before_reconnecting() {
        let (manager, mut attempts) = manager();
        manager.connect("ws://test/ws");
        let remote = attempts.recv().await.unwrap().accept();
        wait_for_state(&manager, ConnectionState::Connected).await;

        remote.push(SocketEvent::Error("connection reset".into()));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert!(attempts.try_recv().is_err());

        remote.push(SocketEvent::Closed);
        wait_for_state(&manager, ConnectionState::Reconnecting).await;

        let _next = attempts.recv().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(attempts.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_message_published_after_dispose() {
        let (manager, mut attempts) = manager();
        manager.connect("ws://test/ws");
        let remote = attempts.recv().await.unwrap().accept();
        wait_for_state(&manager, ConnectionState::Connected).await;

        manager.dispose();
        remote.push(SocketEvent::Message("late".into()));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(manager.latest_message().is_none());
    }

    #[tokio::test]
    async fn test_tungstenite_loopback() {
        use futures::SinkExt;
        use tokio_tungstenite::tungstenite::protocol::Message;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::text(r#"{"type":"heartbeat"}"#)).await.unwrap();
            ws.close(None).await.unwrap();
        });

        let manager = ConnectionManager::new(
            TungsteniteConnector,
            ReconnectPolicy::new(Duration::from_millis(50), Duration::from_millis(200)),
        );
        manager.connect(format!("ws://{}/ws", addr));

        let mut messages = manager.subscribe_messages();
        let message = tokio::time::timeout(
            Duration::from_secs(5),
            messages.wait_for(|m| m.is_some()),
        )
        .await
        .unwrap()
        .unwrap()
        .clone()
        .unwrap();
        assert_eq!(message.payload, r#"{"type":"heartbeat"}"#);

        tokio::time::timeout(
            Duration::from_secs(5),
            wait_for_state(&manager, ConnectionState::Reconnecting),
        )
        .await
        .unwrap();

        manager.shutdown().await;
    }
    #[tokio::test]
    async fn test_tungstenite_silent_server_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Accept TCP but never answer the upgrade request
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let manager = ConnectionManager::new(
            TungsteniteConnector,
            ReconnectPolicy::new(Duration::from_millis(50), Duration::from_millis(200))
                .with_connect_timeout(Duration::from_millis(100)),
        );
        manager.connect(format!("ws://{}/ws", addr));

        tokio::time::timeout(
            Duration::from_secs(5),
            wait_for_state(&manager, ConnectionState::Reconnecting),
        )
        .await
        .unwrap();

        // Backoff keeps advancing: each timed-out handshake is another failure
        tokio::time::timeout(Duration::from_secs(5), async {
            while manager.retry_attempt() < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_tungstenite_reset_without_close_reconnects() {
        use futures::SinkExt;
        use tokio_tungstenite::tungstenite::protocol::Message;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (reconnected_tx, reconnected_rx) = oneshot::channel();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::text("first")).await.unwrap();
            // Drop the TCP stream with no close frame
            drop(ws);

            let (stream, _) = listener.accept().await.unwrap();
            let _ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let _ = reconnected_tx.send(());
            std::future::pending::<()>().await;
        });

        let manager = ConnectionManager::new(
            TungsteniteConnector,
            ReconnectPolicy::new(Duration::from_millis(50), Duration::from_millis(200)),
        );
        let mut states = manager.subscribe_state();
        manager.connect(format!("ws://{}/ws", addr));

        tokio::time::timeout(
            Duration::from_secs(5),
            states.wait_for(|s| *s == ConnectionState::Reconnecting),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(manager.latest_message().unwrap().payload, "first");

        tokio::time::timeout(Duration::from_secs(5), reconnected_rx)
            .await
            .unwrap()
            .unwrap();
        tokio::time::timeout(
            Duration::from_secs(5),
            wait_for_state(&manager, ConnectionState::Connected),
        )
        .await
        .unwrap();

        manager.shutdown().await;
    }
}
