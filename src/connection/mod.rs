//! WebSocket connection management
//!
//! Owns the socket lifecycle behind an explicit state machine, fans
//! connection events out to registered listeners, and drives the
//! exponential-backoff auto-reconnect policy after an unexpected loss.
//!
//! Each teardown bumps a connection epoch; connect completions and
//! reconnect loops carry the epoch they started under and abandon their
//! work when it has moved on, so a superseded attempt can never revive a
//! stale socket.

pub mod backoff;

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::audio::AudioFrame;
use crate::{Error, Result};

pub use backoff::{ReconnectPolicy, delay_for_attempt};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket; the initial state
    Disconnected,
    /// A connect attempt is in flight
    Connecting,
    /// The socket is open and frames flow
    Connected,
    /// Waiting out a backoff delay before an automatic attempt
    Reconnecting,
    /// Automatic reconnection gave up; only a manual reconnect resumes
    Failed,
}

impl ConnectionState {
    /// Stable lowercase name, matching the wire-facing status strings
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event delivered to registered listeners
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// The socket opened
    Open,
    /// The socket closed (code absent when the peer vanished without one)
    Closed {
        /// Close code from the peer, when present
        code: Option<u16>,
        /// Close reason or error description
        reason: String,
    },
    /// An inbound binary payload
    Message(Vec<u8>),
    /// A transport error
    Error(String),
    /// The connection state changed
    Status(ConnectionState),
}

/// Listener category for registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Socket opened
    Open,
    /// Socket closed
    Close,
    /// Inbound binary payload
    Message,
    /// Transport error
    Error,
    /// State change
    Status,
}

impl ConnectionEvent {
    /// The category this event is delivered under
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Open => EventKind::Open,
            Self::Closed { .. } => EventKind::Close,
            Self::Message(_) => EventKind::Message,
            Self::Error(_) => EventKind::Error,
            Self::Status(_) => EventKind::Status,
        }
    }
}

/// Handle for removing a registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&ConnectionEvent) + Send + Sync>;

struct Inner {
    state: ConnectionState,
    attempts: u32,
    epoch: u64,
    outbound: Option<mpsc::UnboundedSender<Message>>,
}

struct Shared {
    endpoint: String,
    policy: ReconnectPolicy,
    inner: Mutex<Inner>,
    listeners: Mutex<HashMap<EventKind, Vec<(u64, Listener)>>>,
    next_listener_id: AtomicU64,
}

/// Manages the persistent WebSocket to the voice backend
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// Create a new manager for the given endpoint; no connection is
    /// attempted until [`connect`](Self::connect).
    #[must_use]
    pub fn new(endpoint: impl Into<String>, policy: ReconnectPolicy) -> Self {
        Self {
            shared: Arc::new(Shared {
                endpoint: endpoint.into(),
                policy,
                inner: Mutex::new(Inner {
                    state: ConnectionState::Disconnected,
                    attempts: 0,
                    epoch: 0,
                    outbound: None,
                }),
                listeners: Mutex::new(HashMap::new()),
                next_listener_id: AtomicU64::new(1),
            }),
        }
    }

    /// Current connection state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner().state
    }

    /// Check if the socket is open
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Number of automatic reconnect attempts since the last successful
    /// connect
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.inner().attempts
    }

    /// Register a listener for an event category.
    ///
    /// Multiple listeners per category are supported; a panicking listener
    /// is isolated and logged, later listeners still run.
    pub fn on(
        &self,
        kind: EventKind,
        listener: impl Fn(&ConnectionEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = self.shared.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(listener)));
        ListenerId(id)
    }

    /// Remove a previously registered listener; returns whether it existed.
    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        let mut listeners = self.listeners();
        let Some(entries) = listeners.get_mut(&kind) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id.0);
        entries.len() < before
    }

    /// Open the connection.
    ///
    /// No-op when already connected. On success the state becomes
    /// [`ConnectionState::Connected`] and the attempt counter resets; on
    /// failure the caller gets the error and no automatic retry happens.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectFailed`] when the transport cannot be
    /// opened, when a connect is already in flight, or when the attempt was
    /// superseded by a disconnect while in flight.
    pub async fn connect(&self) -> Result<()> {
        let epoch = {
            let mut inner = self.inner();
            match inner.state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Connecting => {
                    return Err(Error::ConnectFailed(
                        "connect already in progress".to_string(),
                    ));
                }
                _ => {}
            }
            inner.state = ConnectionState::Connecting;
            inner.epoch
        };
        self.emit(&ConnectionEvent::Status(ConnectionState::Connecting));
        tracing::info!(endpoint = %self.shared.endpoint, "connecting");

        match connect_async(self.shared.endpoint.as_str()).await {
            Ok((socket, _response)) => self.install_socket(socket, epoch),
            Err(e) => {
                {
                    let mut inner = self.inner();
                    if inner.epoch == epoch && inner.state == ConnectionState::Connecting {
                        inner.state = ConnectionState::Disconnected;
                    }
                }
                self.emit(&ConnectionEvent::Error(e.to_string()));
                self.emit(&ConnectionEvent::Status(ConnectionState::Disconnected));
                tracing::warn!(error = %e, "connect failed");
                Err(Error::ConnectFailed(e.to_string()))
            }
        }
    }

    /// Wire up a freshly opened socket, unless the attempt went stale.
    fn install_socket(&self, socket: WsStream, epoch: u64) -> Result<()> {
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut inner = self.inner();
            if inner.epoch != epoch {
                tracing::debug!("discarding superseded connection attempt");
                drop(inner);
                drop(socket);
                return Err(Error::ConnectFailed(
                    "attempt superseded by disconnect".to_string(),
                ));
            }
            inner.state = ConnectionState::Connected;
            inner.attempts = 0;
            inner.outbound = Some(tx);
        }

        let (sink, stream) = socket.split();
        tokio::spawn(run_writer(rx, sink));
        tokio::spawn(self.clone().run_reader(stream, epoch));

        self.emit(&ConnectionEvent::Open);
        self.emit(&ConnectionEvent::Status(ConnectionState::Connected));
        tracing::info!("connected");
        Ok(())
    }

    /// Close the connection gracefully. Idempotent.
    ///
    /// Bumps the epoch, so any in-flight connect or pending auto-reconnect
    /// unwinds without touching the new state.
    pub fn disconnect(&self) {
        let outbound = {
            let mut inner = self.inner();
            inner.epoch += 1;
            inner.outbound.take()
        };

        if let Some(tx) = outbound {
            let _ = tx.send(Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "client disconnecting".into(),
            })));
        }

        self.set_state(ConnectionState::Disconnected);
        tracing::info!("disconnected");
    }

    /// Tear down and re-establish the connection (user-triggered).
    ///
    /// Emits a `connecting` status, fully disconnects, waits the settle
    /// delay, then connects. Re-arms automatic reconnection by resetting
    /// the attempt counter. Returns whether the new connection succeeded.
    pub async fn reconnect(&self) -> bool {
        tracing::info!("manual reconnect requested");
        self.emit(&ConnectionEvent::Status(ConnectionState::Connecting));
        self.disconnect();

        let epoch = {
            let mut inner = self.inner();
            inner.attempts = 0;
            inner.epoch
        };

        tokio::time::sleep(self.shared.policy.settle_delay).await;

        if self.inner().epoch != epoch {
            tracing::debug!("reconnect superseded during settle delay");
            return false;
        }

        self.connect().await.is_ok()
    }

    /// Forward a captured audio frame to the transport.
    ///
    /// Returns `false` without queuing when not connected: audio captured
    /// while disconnected is dropped, never buffered for later delivery.
    pub fn send_frame(&self, frame: AudioFrame) -> bool {
        let inner = self.inner();
        if inner.state != ConnectionState::Connected {
            drop(inner);
            tracing::debug!(bytes = frame.as_bytes().len(), "not connected, dropping frame");
            return false;
        }

        match &inner.outbound {
            Some(tx) => tx.send(Message::Binary(frame.into_bytes())).is_ok(),
            None => false,
        }
    }

    /// Send a JSON control message over the transport.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SendFailed`] when not connected,
    /// [`Error::Serialization`] when the value cannot be serialized.
    pub fn send_control(&self, message: &serde_json::Value) -> Result<()> {
        let text = serde_json::to_string(message)?;

        let inner = self.inner();
        if inner.state != ConnectionState::Connected {
            return Err(Error::SendFailed);
        }
        inner
            .outbound
            .as_ref()
            .ok_or(Error::SendFailed)?
            .send(Message::Text(text))
            .map_err(|_| Error::SendFailed)
    }

    /// Read inbound traffic until the socket ends, then hand off to the
    /// auto-reconnect loop when this reader is still current.
    async fn run_reader(self, mut stream: SplitStream<WsStream>, epoch: u64) {
        let mut close_code: Option<u16> = None;
        let mut close_reason = String::new();

        while let Some(item) = stream.next().await {
            match item {
                Ok(Message::Binary(payload)) => {
                    self.emit(&ConnectionEvent::Message(payload));
                }
                Ok(Message::Text(text)) => {
                    tracing::debug!(len = text.len(), "ignoring inbound text frame");
                }
                Ok(Message::Close(frame)) => {
                    if let Some(frame) = frame {
                        close_code = Some(u16::from(frame.code));
                        close_reason = frame.reason.to_string();
                    }
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    close_reason = e.to_string();
                    self.emit(&ConnectionEvent::Error(e.to_string()));
                    break;
                }
            }
        }

        let current = {
            let mut inner = self.inner();
            if inner.epoch == epoch {
                inner.outbound = None;
                true
            } else {
                false
            }
        };

        if !current {
            tracing::debug!("stale reader exiting");
            return;
        }

        tracing::warn!(
            code = close_code,
            reason = %close_reason,
            "connection lost"
        );
        self.emit(&ConnectionEvent::Closed {
            code: close_code,
            reason: close_reason,
        });
        self.set_state(ConnectionState::Disconnected);

        tokio::spawn(self.clone().auto_reconnect(epoch));
    }

    /// Automatic reconnection with exponential backoff.
    ///
    /// Bounded loop: each iteration re-evaluates the attempt counter and
    /// the epoch, waits the doubled delay, and tries once. Gives up into
    /// [`ConnectionState::Failed`] after the policy maximum; a disconnect
    /// issued meanwhile ends the loop silently.
    async fn auto_reconnect(self, epoch: u64) {
        loop {
            let next_attempt = {
                let mut inner = self.inner();
                if inner.epoch != epoch {
                    tracing::debug!("auto-reconnect superseded");
                    return;
                }
                if inner.attempts >= self.shared.policy.max_attempts {
                    None
                } else {
                    inner.attempts += 1;
                    Some(inner.attempts)
                }
            };

            let Some(attempt) = next_attempt else {
                tracing::error!(
                    max_attempts = self.shared.policy.max_attempts,
                    "reconnect attempts exhausted"
                );
                self.emit(&ConnectionEvent::Error(
                    Error::MaxReconnectAttempts.to_string(),
                ));
                self.set_state(ConnectionState::Failed);
                return;
            };

            let delay = delay_for_attempt(&self.shared.policy, attempt);
            tracing::info!(
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "scheduling reconnect"
            );
            self.set_state(ConnectionState::Reconnecting);

            tokio::time::sleep(delay).await;

            if self.inner().epoch != epoch {
                tracing::debug!("auto-reconnect superseded during backoff");
                return;
            }

            match self.connect().await {
                Ok(()) => {
                    tracing::info!(attempt, "reconnected");
                    return;
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "reconnect attempt failed");
                }
            }
        }
    }

    /// Transition the state, emitting a status event when it changed.
    fn set_state(&self, next: ConnectionState) {
        let changed = {
            let mut inner = self.inner();
            if inner.state == next {
                false
            } else {
                inner.state = next;
                true
            }
        };

        if changed {
            tracing::debug!(state = %next, "connection state changed");
            self.emit(&ConnectionEvent::Status(next));
        }
    }

    /// Deliver an event to every listener of its category.
    fn emit(&self, event: &ConnectionEvent) {
        let targets: Vec<Listener> = self
            .listeners()
            .get(&event.kind())
            .map(|entries| entries.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();

        for listener in targets {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                tracing::error!(kind = ?event.kind(), "event listener panicked");
            }
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.shared.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn listeners(&self) -> MutexGuard<'_, HashMap<EventKind, Vec<(u64, Listener)>>> {
        self.shared
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Drain the outbound channel into the socket sink.
///
/// A queued close frame ends the writer after it is flushed.
async fn run_writer(
    mut rx: mpsc::UnboundedReceiver<Message>,
    mut sink: SplitSink<WsStream, Message>,
) {
    while let Some(message) = rx.recv().await {
        let is_close = matches!(message, Message::Close(_));
        if let Err(e) = sink.send(message).await {
            tracing::debug!(error = %e, "outbound send failed");
            break;
        }
        if is_close {
            break;
        }
    }
    let _ = sink.close().await;
}
