//! Chat session: one browser conversation and its WebSocket.
//!
//! A session is minted by the registry on `POST /chat` and attached to a
//! WebSocket on upgrade. Once attached it runs two tasks:
//!
//! - the **read pump** owns the receiving half. It decodes browser frames,
//!   hands accepted messages to the registry and is the only place that
//!   tears the session down.
//! - the **write pump** owns the sending half and is the only task that ever
//!   writes to the socket. It delivers outbox frames and sends keepalive
//!   pings.
//!
//! Teardown order is fixed: cancel producers, `unregister`, drop the
//! connection's read half, close the outbox. The write pump drains what is
//! left in the outbox, sends a CLOSE frame and exits.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use chatrelay_protocol::codec::{decode_chat_message, encode_error_frame};
use chatrelay_protocol::{new_session_id, ChatMessage};

use crate::registry::RegistryHandle;

pub const READ_TIMEOUT: Duration = Duration::from_secs(60);
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
pub const READ_LIMIT: usize = 1024;
pub const OUTBOX_CAPACITY: usize = 256;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session is closed")]
    Closed,
}

/// Timeouts and limits applied to every session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub ping_period: Duration,
    pub read_limit: usize,
    pub outbox_capacity: usize,
}

impl SessionConfig {
    /// Set the read timeout; the ping period follows at 90% of it.
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self.ping_period = read_timeout * 9 / 10;
        self
    }

    pub fn with_outbox_capacity(mut self, capacity: usize) -> Self {
        self.outbox_capacity = capacity.max(1);
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_timeout: READ_TIMEOUT,
            write_timeout: WRITE_TIMEOUT,
            ping_period: READ_TIMEOUT * 9 / 10,
            read_limit: READ_LIMIT,
            outbox_capacity: OUTBOX_CAPACITY,
        }
    }
}

/// A live browser conversation.
pub struct Session {
    id: Uuid,
    user_id: String,
    config: SessionConfig,
    registry: RegistryHandle,

    /// Producer side of the outbox; `None` once closed.
    outbox: Mutex<Option<mpsc::Sender<String>>>,
    /// Consumer side, handed to the write pump on attach.
    outbox_rx: Mutex<Option<mpsc::Receiver<String>>>,

    messages: Mutex<Vec<ChatMessage>>,
    attached: AtomicBool,
    active_pumps: Arc<AtomicUsize>,

    /// Fired when teardown starts. Stops producers and wakes the read pump.
    cancel: CancellationToken,
}

impl Session {
    pub fn new(user_id: impl Into<String>, config: SessionConfig, registry: RegistryHandle) -> Self {
        let (tx, rx) = mpsc::channel(config.outbox_capacity.max(1));
        Self {
            id: new_session_id(),
            user_id: user_id.into(),
            config,
            registry,
            outbox: Mutex::new(Some(tx)),
            outbox_rx: Mutex::new(Some(rx)),
            messages: Mutex::new(Vec::new()),
            attached: AtomicBool::new(false),
            active_pumps: Arc::new(AtomicUsize::new(0)),
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    /// Whether teardown has started.
    pub fn is_closing(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Number of pump tasks still running (0, 1 or 2).
    pub fn active_pumps(&self) -> usize {
        self.active_pumps.load(Ordering::Acquire)
    }

    pub async fn is_outbox_closed(&self) -> bool {
        self.outbox.lock().await.is_none()
    }

    /// Messages accepted from the browser so far, in arrival order.
    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.messages.lock().await.clone()
    }

    /// Attach a freshly upgraded WebSocket and start both pumps.
    ///
    /// Returns `false` without touching `socket` if a connection is already
    /// attached.
    pub async fn attach(self: &Arc<Self>, socket: WebSocket) -> bool {
        if self.attached.swap(true, Ordering::AcqRel) {
            warn!(
                component = "session",
                event = "session.attach.duplicate",
                session_id = %self.id,
                "Session already has a connection, ignoring"
            );
            return false;
        }

        let Some(outbox_rx) = self.outbox_rx.lock().await.take() else {
            warn!(
                component = "session",
                event = "session.attach.outbox_gone",
                session_id = %self.id,
                "Outbox receiver already taken"
            );
            return false;
        };

        let (sink, stream) = socket.split();

        self.active_pumps.fetch_add(2, Ordering::AcqRel);
        tokio::spawn(Arc::clone(self).write_pump(sink, outbox_rx));
        tokio::spawn(Arc::clone(self).read_pump(stream));

        info!(
            component = "session",
            event = "session.attached",
            session_id = %self.id,
            user_id = %self.user_id,
            "Chat connection attached"
        );
        true
    }

    /// Queue a serialized frame for the browser.
    ///
    /// Waits while the outbox is full. Fails once teardown has started.
    pub async fn enqueue(&self, frame: String) -> Result<(), SessionError> {
        if self.cancel.is_cancelled() {
            return Err(SessionError::Closed);
        }
        let tx = self
            .outbox
            .lock()
            .await
            .clone()
            .ok_or(SessionError::Closed)?;

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SessionError::Closed),
            sent = tx.send(frame) => sent.map_err(|_| SessionError::Closed),
        }
    }

    /// Ask the session to tear down. The read pump performs the teardown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Close the outbox. Returns `true` only for the call that closed it.
    pub(crate) async fn close_outbox(&self) -> bool {
        let closed = self.outbox.lock().await.take().is_some();
        if closed {
            debug!(
                component = "session",
                event = "session.outbox.closed",
                session_id = %self.id,
                "Outbox closed"
            );
        }
        closed
    }

    async fn read_pump(self: Arc<Self>, mut stream: SplitStream<WebSocket>) {
        let _guard = PumpGuard(Arc::clone(&self.active_pumps));
        let mut deadline = Instant::now() + self.config.read_timeout;

        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!(
                        component = "session",
                        event = "session.read.cancelled",
                        session_id = %self.id,
                        "Session shutting down, ending read loop"
                    );
                    break;
                }
                next = tokio::time::timeout_at(deadline, stream.next()) => next,
            };

            let frame = match next {
                Err(_) => {
                    warn!(
                        component = "session",
                        event = "session.read.deadline_exceeded",
                        session_id = %self.id,
                        "No pong before read deadline, ending read loop"
                    );
                    break;
                }
                Ok(None) => {
                    info!(
                        component = "session",
                        event = "session.read.closed",
                        session_id = %self.id,
                        "Chat was closed by the browser, ending read loop"
                    );
                    break;
                }
                Ok(Some(Err(e))) if is_abrupt_close(&e) => {
                    info!(
                        component = "session",
                        event = "session.read.reset",
                        session_id = %self.id,
                        code = close_code::ABNORMAL,
                        error = %e,
                        "Chat connection dropped without close handshake, ending read loop"
                    );
                    break;
                }
                Ok(Some(Err(e))) => {
                    error!(
                        component = "session",
                        event = "session.read.error",
                        session_id = %self.id,
                        error = %e,
                        "Chat connection error"
                    );
                    break;
                }
                Ok(Some(Ok(frame))) => frame,
            };

            match frame {
                Message::Text(text) => self.handle_frame(text.as_str().as_bytes()).await,
                Message::Binary(data) => self.handle_frame(&data).await,
                Message::Pong(_) => {
                    deadline = Instant::now() + self.config.read_timeout;
                }
                Message::Ping(_) => {}
                Message::Close(close) => {
                    log_close(self.id, close.as_ref());
                    break;
                }
            }
        }

        self.close(stream).await;
    }

    async fn handle_frame(&self, payload: &[u8]) {
        let mut message = match decode_chat_message(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    component = "session",
                    event = "session.read.parse_failed",
                    session_id = %self.id,
                    error = %e,
                    payload_bytes = payload.len(),
                    "Failed to parse chat frame"
                );
                self.send_parse_error(e.to_string()).await;
                return;
            }
        };

        message.user_id = self.user_id.clone();
        info!(
            component = "session",
            event = "session.read.message",
            session_id = %self.id,
            message_id = %message.id,
            "Received chat message"
        );
        self.messages.lock().await.push(message.clone());
        self.registry.send_upstream(message, self.id).await;
    }

    async fn send_parse_error(&self, error: String) {
        let frame = match encode_error_frame(error) {
            Ok(frame) => frame,
            Err(e) => {
                error!(
                    component = "session",
                    event = "session.error_frame.serialize_failed",
                    session_id = %self.id,
                    error = %e,
                    "Failed to serialize error frame"
                );
                return;
            }
        };
        if self.enqueue(frame).await.is_err() {
            debug!(
                component = "session",
                event = "session.error_frame.dropped",
                session_id = %self.id,
                "Session closing, error frame not delivered"
            );
        }
    }

    /// Teardown, run once by the read pump when it exits.
    async fn close(&self, stream: SplitStream<WebSocket>) {
        self.cancel.cancel();
        self.registry.unregister(self.id).await;
        drop(stream);
        self.close_outbox().await;
        info!(
            component = "session",
            event = "session.closed",
            session_id = %self.id,
            "Chat session closed"
        );
    }

    async fn write_pump(
        self: Arc<Self>,
        mut sink: SplitSink<WebSocket, Message>,
        mut outbox: mpsc::Receiver<String>,
    ) {
        let _guard = PumpGuard(Arc::clone(&self.active_pumps));
        let period = self.config.ping_period;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                frame = outbox.recv() => {
                    let Some(frame) = frame else {
                        if let Err(e) = self.write(&mut sink, Message::Close(None)).await {
                            debug!(
                                component = "session",
                                event = "session.write.close_failed",
                                session_id = %self.id,
                                error = %e,
                                "Failed sending close frame"
                            );
                        }
                        break;
                    };
                    let bytes = frame.len();
                    if let Err(e) = self.write(&mut sink, Message::Text(frame.into())).await {
                        error!(
                            component = "session",
                            event = "session.write.failed",
                            session_id = %self.id,
                            error = %e,
                            "Failed writing frame"
                        );
                        self.cancel.cancel();
                        break;
                    }
                    debug!(
                        component = "session",
                        event = "session.write.frame",
                        session_id = %self.id,
                        bytes,
                        "Frame written"
                    );
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.write(&mut sink, Message::Ping(Bytes::new())).await {
                        info!(
                            component = "session",
                            event = "session.write.ping_failed",
                            session_id = %self.id,
                            error = %e,
                            "Failed to send ping, ending write loop"
                        );
                        self.cancel.cancel();
                        break;
                    }
                }
            }
        }

        debug!(
            component = "session",
            event = "session.write.stopped",
            session_id = %self.id,
            "Write loop stopped"
        );
    }

    async fn write(
        &self,
        sink: &mut SplitSink<WebSocket, Message>,
        message: Message,
    ) -> Result<(), WriteError> {
        match tokio::time::timeout(self.config.write_timeout, sink.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(WriteError::Socket(e)),
            Err(_) => Err(WriteError::Timeout),
        }
    }
}

#[derive(Debug, Error)]
enum WriteError {
    #[error("{0}")]
    Socket(axum::Error),
    #[error("write deadline exceeded")]
    Timeout,
}

/// Decrements the running pump count when a pump returns.
struct PumpGuard(Arc<AtomicUsize>);

impl Drop for PumpGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Whether a read error means the browser went away without a CLOSE frame.
fn is_abrupt_close(error: &axum::Error) -> bool {
    use std::error::Error as _;

    match error.source().and_then(|source| source.downcast_ref::<WsError>()) {
        Some(WsError::ConnectionClosed | WsError::AlreadyClosed) => true,
        Some(WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake)) => true,
        Some(WsError::Io(e)) => matches!(
            e.kind(),
            std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::UnexpectedEof
        ),
        _ => false,
    }
}

fn log_close(session_id: Uuid, close: Option<&CloseFrame>) {
    let code = close.map(|frame| frame.code);
    let clean = matches!(
        code,
        None | Some(close_code::NORMAL)
            | Some(close_code::AWAY)
            | Some(close_code::STATUS)
            | Some(close_code::ABNORMAL)
    );
    if clean {
        info!(
            component = "session",
            event = "session.read.close_frame",
            session_id = %session_id,
            code = ?code,
            "Chat was closed by the browser, ending read loop"
        );
    } else {
        error!(
            component = "session",
            event = "session.read.unexpected_close",
            session_id = %session_id,
            code = ?code,
            "Chat closed with unexpected status"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryCommand;

    fn test_session(capacity: usize) -> (Arc<Session>, mpsc::Receiver<RegistryCommand>) {
        let (tx, rx) = mpsc::channel(16);
        let config = SessionConfig::default().with_outbox_capacity(capacity);
        let registry = RegistryHandle::from_sender(tx, config);
        (Arc::new(Session::new("u1", config, registry)), rx)
    }

    #[test]
    fn ping_period_follows_read_timeout() {
        let config = SessionConfig::default();
        assert_eq!(config.ping_period, Duration::from_secs(54));

        let short = config.with_read_timeout(Duration::from_secs(10));
        assert_eq!(short.ping_period, Duration::from_secs(9));
    }

    #[test]
    fn dropped_connections_are_abrupt_closes() {
        use tokio_tungstenite::tungstenite::error::CapacityError;

        assert!(is_abrupt_close(&axum::Error::new(WsError::ConnectionClosed)));
        assert!(is_abrupt_close(&axum::Error::new(WsError::Protocol(
            ProtocolError::ResetWithoutClosingHandshake
        ))));
        assert!(is_abrupt_close(&axum::Error::new(WsError::Io(
            std::io::Error::from(std::io::ErrorKind::ConnectionReset)
        ))));

        assert!(!is_abrupt_close(&axum::Error::new(WsError::Capacity(
            CapacityError::MessageTooLong {
                size: 2048,
                max_size: READ_LIMIT,
            }
        ))));
        assert!(!is_abrupt_close(&axum::Error::new(std::io::Error::other(
            "not a websocket error"
        ))));
    }

    #[tokio::test]
    async fn enqueued_frames_keep_order() {
        let (session, _rx) = test_session(8);
        session.enqueue("one".into()).await.unwrap();
        session.enqueue("two".into()).await.unwrap();

        let mut outbox = session.outbox_rx.lock().await.take().unwrap();
        assert_eq!(outbox.recv().await.as_deref(), Some("one"));
        assert_eq!(outbox.recv().await.as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn outbox_closes_exactly_once() {
        let (session, _rx) = test_session(8);
        assert!(!session.is_outbox_closed().await);
        assert!(session.close_outbox().await);
        assert!(!session.close_outbox().await);
        assert!(session.is_outbox_closed().await);
        assert_eq!(
            session.enqueue("late".into()).await,
            Err(SessionError::Closed)
        );
    }

    #[tokio::test]
    async fn closed_outbox_drains_before_ending() {
        let (session, _rx) = test_session(8);
        session.enqueue("queued".into()).await.unwrap();
        let mut outbox = session.outbox_rx.lock().await.take().unwrap();
        session.close_outbox().await;

        assert_eq!(outbox.recv().await.as_deref(), Some("queued"));
        assert_eq!(outbox.recv().await, None);
    }

    #[tokio::test]
    async fn full_outbox_applies_backpressure_until_shutdown() {
        let (session, _rx) = test_session(1);
        session.enqueue("first".into()).await.unwrap();

        let blocked = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.enqueue("second".into()).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!blocked.is_finished(), "producer should wait, not drop");

        session.shutdown();
        assert_eq!(blocked.await.unwrap(), Err(SessionError::Closed));
        assert!(session.is_closing());
    }

    #[tokio::test]
    async fn blocked_producer_resumes_when_consumer_reads() {
        let (session, _rx) = test_session(1);
        session.enqueue("first".into()).await.unwrap();
        let mut outbox = session.outbox_rx.lock().await.take().unwrap();

        let pending = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.enqueue("second".into()).await })
        };
        assert_eq!(outbox.recv().await.as_deref(), Some("first"));
        assert_eq!(pending.await.unwrap(), Ok(()));
        assert_eq!(outbox.recv().await.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn parse_errors_are_answered_through_the_outbox() {
        let (session, mut registry_rx) = test_session(8);
        session.handle_frame(b"not json").await;

        let mut outbox = session.outbox_rx.lock().await.take().unwrap();
        let frame = outbox.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["messageId"], "");
        assert_eq!(value["reqid"], "");
        assert!(!value["error"].as_str().unwrap().is_empty());
        assert!(registry_rx.try_recv().is_err());
        assert!(session.messages().await.is_empty());
    }

    #[tokio::test]
    async fn accepted_messages_are_stamped_logged_and_sent_upstream() {
        let (session, mut registry_rx) = test_session(8);
        session
            .handle_frame(br#"{"id":"m1","text":"hi","userId":"spoofed"}"#)
            .await;

        let log = session.messages().await;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].user_id, "u1");

        match registry_rx.recv().await {
            Some(RegistryCommand::SendUpstream {
                message,
                session_id,
            }) => {
                assert_eq!(message.id, "m1");
                assert_eq!(message.user_id, "u1");
                assert_eq!(session_id, session.id());
            }
            _ => panic!("expected SendUpstream"),
        }
    }
}
