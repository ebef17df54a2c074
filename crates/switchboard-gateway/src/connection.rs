//! Connection table and per-connection state machine.
//!
//! ```text
//! Connecting -> Handshaking -> Open -> Draining -> Closed
//!                    |           |                   ^
//!                    +-----------+-------------------+
//! ```
//!
//! `Closed` is terminal: a closed connection is removed from the arena, its
//! id goes stale, and anything still holding the id gets `NotFound`.
//!
//! The manager never touches a socket. Each connection holds a
//! [`TransportLink`]: a bounded queue of encoded frames and a control channel
//! read by the connection's writer task.

use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;

use axum::extract::ws::close_code;
use serde::Serialize;
use switchboard_protocol::{CodecError, StreamDecoder, encode};
use switchboard_types::{ConnectionId, Message};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;

use crate::arena::Arena;
use crate::error::{GatewayError, SendError};
use crate::reactor::TimerId;
use crate::session::Session;

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Transport accept in progress.
    Connecting,
    /// Waiting for the client's `hello`.
    Handshaking,
    /// Exchanging messages.
    Open,
    /// Flushing queued frames before closing.
    Draining,
    /// Gone.
    Closed,
}

impl ConnectionState {
    /// Whether `self -> next` is an edge of the state machine.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Handshaking)
                | (Self::Handshaking | Self::Open | Self::Draining, Self::Closed)
                | (Self::Handshaking, Self::Open)
                | (Self::Open, Self::Draining)
        )
    }

    /// Lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Open => "open",
            Self::Draining => "draining",
            Self::Closed => "closed",
        }
    }
}

impl core::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Close code and reason sent in the WebSocket close frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseReason {
    /// WebSocket close code.
    pub code: u16,
    /// Short reason text.
    pub reason: &'static str,
}

impl CloseReason {
    /// Graceful close.
    pub const NORMAL: Self = Self::new(close_code::NORMAL, "closed");
    /// The peer sent a close frame.
    pub const PEER: Self = Self::new(close_code::NORMAL, "peer closed");
    /// No activity within the idle timeout.
    pub const IDLE: Self = Self::new(close_code::AWAY, "idle timeout");
    /// The gateway is shutting down.
    pub const SHUTDOWN: Self = Self::new(close_code::AWAY, "shutting down");
    /// The first message was not an acceptable `hello`.
    pub const HANDSHAKE_FAILED: Self = Self::new(close_code::PROTOCOL, "handshake failed");
    /// No `hello` within the handshake timeout.
    pub const HANDSHAKE_TIMEOUT: Self = Self::new(close_code::PROTOCOL, "handshake timeout");
    /// The inbound stream can no longer be framed.
    pub const FRAME_TOO_LARGE: Self = Self::new(close_code::SIZE, "frame too large");
    /// The gateway hit an internal error or the drain deadline.
    pub const INTERNAL: Self = Self::new(close_code::ERROR, "internal error");

    /// Build a close reason.
    pub const fn new(code: u16, reason: &'static str) -> Self {
        Self { code, reason }
    }
}

/// Instruction for a connection's writer task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Flush queued frames, send a close frame, then report `Drained`.
    Close(CloseReason),
    /// Send a close frame now, discarding queued frames.
    Abort(CloseReason),
}

/// Gateway side of a connection's transport.
#[derive(Debug)]
pub struct TransportLink {
    messages: mpsc::Sender<String>,
    control: mpsc::UnboundedSender<Control>,
    peer: Option<SocketAddr>,
}

/// Transport side of a [`TransportLink`], read by the writer task.
#[derive(Debug)]
pub struct LinkEnds {
    /// Encoded frames to write, in order.
    pub messages: mpsc::Receiver<String>,
    /// Close instructions.
    pub control: mpsc::UnboundedReceiver<Control>,
}

impl TransportLink {
    /// Create a link whose outbound queue holds `capacity` frames.
    pub fn pair(capacity: usize, peer: Option<SocketAddr>) -> (Self, LinkEnds) {
        let (messages, messages_rx) = mpsc::channel(capacity.max(1));
        let (control, control_rx) = mpsc::unbounded_channel();
        (
            Self {
                messages,
                control,
                peer,
            },
            LinkEnds {
                messages: messages_rx,
                control: control_rx,
            },
        )
    }

    /// Remote address, when known.
    pub const fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn queue_is_empty(&self) -> bool {
        self.messages.capacity() == self.messages.max_capacity()
    }

    fn control(&self, control: Control) {
        // A gone writer means the socket is already down.
        let _ = self.control.send(control);
    }
}

/// One client connection.
#[derive(Debug)]
pub struct Connection {
    state: ConnectionState,
    link: TransportLink,
    decoder: StreamDecoder,
    session: Session,
    accepted_at: Instant,
    last_activity: Instant,
    handshake_timer: Option<TimerId>,
    drain_timer: Option<TimerId>,
}

impl Connection {
    /// Current state.
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Remember the handshake timer so it can be cancelled.
    pub const fn set_handshake_timer(&mut self, timer: TimerId) {
        self.handshake_timer = Some(timer);
    }

    /// Take the handshake timer.
    pub const fn take_handshake_timer(&mut self) -> Option<TimerId> {
        self.handshake_timer.take()
    }

    /// Remember the drain timer so it can be cancelled.
    pub const fn set_drain_timer(&mut self, timer: TimerId) {
        self.drain_timer = Some(timer);
    }

    /// Timers still scheduled for this connection.
    pub fn timers(&self) -> Vec<TimerId> {
        self.handshake_timer.into_iter().chain(self.drain_timer).collect()
    }
}

/// Result of a graceful close request.
#[derive(Debug)]
pub enum CloseOutcome {
    /// The connection is closed and removed.
    Closed(Connection),
    /// Frames are still queued; the writer will report when flushed.
    Draining,
}

/// Topic name to subscriber ids.
#[derive(Debug, Default)]
pub struct TopicIndex {
    topics: HashMap<String, BTreeSet<ConnectionId>>,
}

impl TopicIndex {
    /// Add a subscriber.
    pub fn subscribe(&mut self, topic: &str, id: ConnectionId) {
        self.topics.entry(topic.to_owned()).or_default().insert(id);
    }

    /// Remove a subscriber, dropping the topic once it has none.
    pub fn unsubscribe(&mut self, topic: &str, id: ConnectionId) {
        if let Some(ids) = self.topics.get_mut(topic) {
            ids.remove(&id);
            if ids.is_empty() {
                self.topics.remove(topic);
            }
        }
    }

    /// Subscribers of `topic`, in id order.
    pub fn subscribers(&self, topic: &str) -> Vec<ConnectionId> {
        self.topics
            .get(topic)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }
}

/// Owner of every live connection. Only the reactor task touches it.
#[derive(Debug)]
pub struct ConnectionManager {
    connections: Arena<Connection>,
    topics: TopicIndex,
    max_frame_bytes: usize,
}

impl ConnectionManager {
    /// Empty table whose decoders cap frames at `max_frame_bytes`.
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            connections: Arena::new(),
            topics: TopicIndex::default(),
            max_frame_bytes,
        }
    }

    /// Register an accepted transport. The connection starts handshaking.
    pub fn accept(&mut self, link: TransportLink) -> Result<ConnectionId, GatewayError> {
        let now = Instant::now();
        let id = self
            .connections
            .insert(Connection {
                state: ConnectionState::Connecting,
                link,
                decoder: StreamDecoder::new(self.max_frame_bytes),
                session: Session::default(),
                accepted_at: now,
                last_activity: now,
                handshake_timer: None,
                drain_timer: None,
            })
            .ok_or(GatewayError::TableFull)?;
        self.transition(id, ConnectionState::Handshaking)?;
        Ok(id)
    }

    /// Live connection count.
    pub const fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connections are live.
    pub const fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Ids of every live connection.
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.ids()
    }

    /// The connection for `id`, if live.
    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(id)
    }

    /// Mutable access to the connection for `id`, if live.
    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(id)
    }

    /// State of `id`; `None` once closed.
    pub fn state(&self, id: ConnectionId) -> Option<ConnectionState> {
        self.get(id).map(Connection::state)
    }

    /// Session of `id`, if live.
    pub fn session_mut(&mut self, id: ConnectionId) -> Option<&mut Session> {
        self.get_mut(id).map(|c| &mut c.session)
    }

    /// Move `id` to `to`, rejecting edges the state machine does not have.
    /// Moving to `Closed` removes the connection; use [`Self::close_now`] or
    /// [`Self::close`] for that.
    pub fn transition(&mut self, id: ConnectionId, to: ConnectionState) -> Result<(), GatewayError> {
        let conn = self
            .connections
            .get_mut(id)
            .ok_or(GatewayError::InvalidTransition {
                id,
                from: ConnectionState::Closed,
                to,
            })?;
        let from = conn.state;
        if !from.can_transition_to(to) {
            return Err(GatewayError::InvalidTransition { id, from, to });
        }
        conn.state = to;
        tracing::debug!(connection = %id, %from, %to, "Connection state changed");
        Ok(())
    }

    /// Record inbound activity.
    pub fn touch(&mut self, id: ConnectionId) {
        if let Some(conn) = self.connections.get_mut(id) {
            conn.last_activity = Instant::now();
        }
    }

    /// Append inbound bytes to the connection's decoder. Returns `false` if
    /// the connection is gone.
    pub fn feed(&mut self, id: ConnectionId, bytes: &[u8]) -> bool {
        let Some(conn) = self.connections.get_mut(id) else {
            return false;
        };
        conn.decoder.feed(bytes);
        conn.last_activity = Instant::now();
        true
    }

    /// Next complete inbound message, in byte-arrival order. `Ok(None)`
    /// means more bytes are needed or the connection is gone.
    pub fn next_message(&mut self, id: ConnectionId) -> Result<Option<Message>, CodecError> {
        self.connections
            .get_mut(id)
            .map_or(Ok(None), |conn| conn.decoder.next_message())
    }

    /// Queue `message` for `id` without waiting.
    ///
    /// # Errors
    ///
    /// [`SendError::QueueFull`] when the outbound queue is at capacity,
    /// [`SendError::NotFound`] when the connection is closed or closing.
    pub fn send(&self, id: ConnectionId, message: &Message) -> Result<(), SendError> {
        self.send_encoded(id, encode(message))
    }

    /// Queue an already encoded frame. Used for fan-out, where one encoding
    /// is shared by every subscriber.
    pub fn send_encoded(&self, id: ConnectionId, frame: String) -> Result<(), SendError> {
        let conn = self.connections.get(id).ok_or(SendError::NotFound)?;
        if !matches!(
            conn.state,
            ConnectionState::Handshaking | ConnectionState::Open
        ) {
            return Err(SendError::NotFound);
        }
        conn.link.messages.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => SendError::QueueFull,
            TrySendError::Closed(_) => SendError::NotFound,
        })
    }

    /// Close gracefully. An open connection with queued frames drains
    /// first; anything else closes at once.
    pub fn close(&mut self, id: ConnectionId, reason: CloseReason) -> Option<CloseOutcome> {
        let conn = self.connections.get(id)?;
        let state = conn.state;
        let queued = !conn.link.queue_is_empty();
        if state != ConnectionState::Draining {
            conn.link.control(Control::Close(reason));
        }
        match state {
            ConnectionState::Open if queued => {
                self.transition(id, ConnectionState::Draining).ok()?;
                Some(CloseOutcome::Draining)
            }
            // Already flushing; the drain completes or times out on its own.
            ConnectionState::Draining => Some(CloseOutcome::Draining),
            _ => self.remove(id, reason).map(CloseOutcome::Closed),
        }
    }

    /// Finish a drain once the writer has flushed.
    pub fn finish_drain(&mut self, id: ConnectionId) -> Option<Connection> {
        if self.state(id) != Some(ConnectionState::Draining) {
            return None;
        }
        self.remove(id, CloseReason::NORMAL)
    }

    /// Close immediately, discarding queued frames.
    pub fn close_now(&mut self, id: ConnectionId, reason: CloseReason) -> Option<Connection> {
        let conn = self.connections.get(id)?;
        conn.link.control(Control::Abort(reason));
        self.remove(id, reason)
    }

    /// Subscribe `id` to `topic`. Returns `None` if the connection is gone,
    /// `Some(false)` if it was already subscribed.
    pub fn subscribe(&mut self, id: ConnectionId, topic: &str) -> Option<bool> {
        let added = self.connections.get_mut(id)?.session.subscribe(topic);
        self.topics.subscribe(topic, id);
        Some(added)
    }

    /// Unsubscribe `id` from `topic`.
    pub fn unsubscribe(&mut self, id: ConnectionId, topic: &str) -> Option<bool> {
        let removed = self.connections.get_mut(id)?.session.unsubscribe(topic);
        self.topics.unsubscribe(topic, id);
        Some(removed)
    }

    /// Subscribers of `topic`.
    pub fn subscribers(&self, topic: &str) -> Vec<ConnectionId> {
        self.topics.subscribers(topic)
    }

    /// Open connections with no activity since `cutoff`.
    pub fn idle_since(&self, cutoff: Instant) -> Vec<ConnectionId> {
        self.connections
            .iter()
            .filter(|(_, conn)| conn.state == ConnectionState::Open && conn.last_activity < cutoff)
            .map(|(id, _)| id)
            .collect()
    }

    fn remove(&mut self, id: ConnectionId, reason: CloseReason) -> Option<Connection> {
        self.transition(id, ConnectionState::Closed).ok()?;
        let mut conn = self.connections.remove(id)?;
        conn.state = ConnectionState::Closed;
        for topic in conn.session.topics() {
            self.topics.unsubscribe(topic, id);
        }
        tracing::info!(
            connection = %id,
            code = reason.code,
            reason = reason.reason,
            open_for = ?conn.accepted_at.elapsed(),
            "Connection closed"
        );
        Some(conn)
    }
}
