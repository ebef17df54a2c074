//! The reactor's event handler: connections, routing and call completion.
//!
//! Every piece of connection and session state lives in [`Gateway`] and is
//! only touched from [`EventHandler::handle`], one event at a time. Transport
//! tasks, store calls and upstream calls run elsewhere and report back by
//! posting an [`Event`].
//!
//! A completion names its call by [`CallId`]. If the call already timed out,
//! the completion finds no pending entry and is dropped. If the connection
//! closed in the meantime, its id no longer resolves and the result is
//! discarded.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use switchboard_outbound::{CallError, CallRequest, CallResponse, OutboundClient};
use switchboard_protocol::{encode, hexdump};
use switchboard_store::{BackendError, Operation, Reply, StoreAdapter};
use switchboard_types::{
    CallId, ConnectionId, CorrelationId, InstanceId, Message, MessageType, Value,
};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::config::{GatewayConfig, OverflowPolicy};
use crate::connection::{
    CloseOutcome, CloseReason, Connection, ConnectionManager, ConnectionState, TransportLink,
};
use crate::error::{GatewayError, SendError};
use crate::pending::{CallKind, PendingCall, PendingCalls};
use crate::reactor::{Context, EventHandler};
use crate::router::{Action, Request, Router, fetch_payload, store_payload};

/// Handshake protocol version the gateway speaks.
pub const PROTOCOL_VERSION: i64 = 1;

/// Everything the gateway reacts to.
#[derive(Debug)]
pub enum Event {
    /// A transport finished its upgrade. The new id, or `None` if refused,
    /// goes back through `ack`.
    Accepted {
        /// Gateway side of the transport.
        link: TransportLink,
        /// Where to send the assigned id.
        ack: oneshot::Sender<Option<ConnectionId>>,
    },
    /// Bytes from a text or binary frame.
    Inbound {
        /// Connection.
        id: ConnectionId,
        /// Frame payload.
        bytes: Vec<u8>,
    },
    /// A ping or pong arrived.
    Activity {
        /// Connection.
        id: ConnectionId,
    },
    /// The peer sent a close frame or ended the stream.
    PeerClosed {
        /// Connection.
        id: ConnectionId,
    },
    /// Reading or writing the socket failed.
    TransportFailed {
        /// Connection.
        id: ConnectionId,
        /// Error text.
        error: String,
    },
    /// The writer flushed everything and sent the close frame.
    Drained {
        /// Connection.
        id: ConnectionId,
    },
    /// The handshake timer fired.
    HandshakeTimeout {
        /// Connection.
        id: ConnectionId,
    },
    /// The drain timer fired.
    DrainTimeout {
        /// Connection.
        id: ConnectionId,
    },
    /// A store call finished.
    StoreDone {
        /// Call.
        call: CallId,
        /// Attempt that finished.
        attempt: u32,
        /// Outcome.
        result: Result<Reply, BackendError>,
    },
    /// An upstream call finished.
    FetchDone {
        /// Call.
        call: CallId,
        /// Outcome.
        result: Result<CallResponse, CallError>,
    },
    /// A call's deadline passed.
    CallTimeout(CallId),
    /// Time to resubmit a store call.
    RetryCall(CallId),
    /// Time to retry a frame that found the queue full.
    RetrySend {
        /// Connection.
        id: ConnectionId,
        /// Encoded frame.
        frame: String,
        /// Retries left after this one.
        remaining: u32,
    },
    /// Look for idle connections.
    IdleSweep,
    /// Log counters.
    StatsReport,
}

/// Counters shared with the HTTP surface.
#[derive(Debug, Default)]
pub struct GatewayStats {
    connections: AtomicU64,
    accepted: AtomicU64,
    messages_in: AtomicU64,
    messages_out: AtomicU64,
    sends_dropped: AtomicU64,
    calls_pending: AtomicU64,
    calls_discarded: AtomicU64,
}

/// Point-in-time copy of [`GatewayStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GatewayStatsSnapshot {
    /// Live connections.
    pub connections: u64,
    /// Connections accepted since start.
    pub accepted: u64,
    /// Messages decoded.
    pub messages_in: u64,
    /// Messages queued for sending.
    pub messages_out: u64,
    /// Messages dropped on a full queue.
    pub sends_dropped: u64,
    /// Store and upstream calls in flight.
    pub calls_pending: u64,
    /// Completions discarded because their connection closed.
    pub calls_discarded: u64,
}

impl GatewayStats {
    /// Read every counter.
    pub fn snapshot(&self) -> GatewayStatsSnapshot {
        GatewayStatsSnapshot {
            connections: self.connections.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            messages_in: self.messages_in.load(Ordering::Relaxed),
            messages_out: self.messages_out.load(Ordering::Relaxed),
            sends_dropped: self.sends_dropped.load(Ordering::Relaxed),
            calls_pending: self.calls_pending.load(Ordering::Relaxed),
            calls_discarded: self.calls_discarded.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

type Cx<'a> = Context<'a, Event>;

/// Event handler owning the connection table and pending calls.
pub struct Gateway {
    config: GatewayConfig,
    connections: ConnectionManager,
    router: Router,
    pending: PendingCalls,
    store: StoreAdapter,
    outbound: OutboundClient,
    instance: InstanceId,
    stats: Arc<GatewayStats>,
    stopping: bool,
}

impl Gateway {
    /// Build the handler. Nothing runs until it is given to a reactor.
    pub fn new(
        config: GatewayConfig,
        store: StoreAdapter,
        outbound: OutboundClient,
        instance: InstanceId,
        stats: Arc<GatewayStats>,
    ) -> Self {
        Self {
            connections: ConnectionManager::new(config.max_frame_bytes),
            config,
            router: Router::new(),
            pending: PendingCalls::default(),
            store,
            outbound,
            instance,
            stats,
            stopping: false,
        }
    }

    fn on_accepted(
        &mut self,
        link: TransportLink,
        ack: oneshot::Sender<Option<ConnectionId>>,
        cx: &mut Cx<'_>,
    ) -> Result<(), GatewayError> {
        let peer = link.peer();
        if self.stopping || self.connections.len() >= self.config.max_connections {
            tracing::warn!(
                peer = ?peer,
                live = self.connections.len(),
                stopping = self.stopping,
                "Connection refused"
            );
            let _ = ack.send(None);
            return Ok(());
        }

        let id = self.connections.accept(link)?;
        if ack.send(Some(id)).is_err() {
            // The transport task is gone; nothing will ever read this link.
            self.close_now(id, CloseReason::INTERNAL, cx);
            return Ok(());
        }
        let timer = cx.schedule_once(self.config.handshake_timeout, Event::HandshakeTimeout { id });
        if let Some(conn) = self.connections.get_mut(id) {
            conn.set_handshake_timer(timer);
        }
        GatewayStats::bump(&self.stats.accepted);
        tracing::info!(connection = %id, peer = ?peer, "Connection accepted");
        Ok(())
    }

    fn on_inbound(
        &mut self,
        id: ConnectionId,
        bytes: &[u8],
        cx: &mut Cx<'_>,
    ) -> Result<(), GatewayError> {
        if !matches!(
            self.connections.state(id),
            Some(ConnectionState::Handshaking | ConnectionState::Open)
        ) {
            return Ok(());
        }
        if tracing::enabled!(tracing::Level::TRACE) {
            tracing::trace!(connection = %id, bytes = bytes.len(), "Inbound frame\n{}", hexdump(bytes));
        }
        self.connections.feed(id, bytes);

        loop {
            match self.connections.next_message(id) {
                Ok(None) => return Ok(()),
                Ok(Some(message)) => {
                    GatewayStats::bump(&self.stats.messages_in);
                    match self.connections.state(id) {
                        Some(ConnectionState::Handshaking) => self.handshake(id, &message, cx)?,
                        Some(ConnectionState::Open) => self.dispatch(id, &message, cx),
                        _ => return Ok(()),
                    }
                }
                Err(e) if e.is_framing() => {
                    tracing::warn!(connection = %id, error = %e, "Inbound stream corrupt, closing");
                    self.close_now(id, CloseReason::FRAME_TOO_LARGE, cx);
                    return Ok(());
                }
                Err(e) => {
                    tracing::debug!(connection = %id, error = %e, "Undecodable message rejected");
                    self.deliver(id, &Message::error(e.correlation_id().cloned(), e.reason()), cx);
                    if self.connections.state(id) == Some(ConnectionState::Handshaking) {
                        self.close(id, CloseReason::HANDSHAKE_FAILED, cx);
                        return Ok(());
                    }
                }
            }
        }
    }

    fn handshake(
        &mut self,
        id: ConnectionId,
        message: &Message,
        cx: &mut Cx<'_>,
    ) -> Result<(), GatewayError> {
        let version = message.payload().optional_i64("protocol").ok().flatten();
        if message.kind() != MessageType::Hello || version != Some(PROTOCOL_VERSION) {
            tracing::warn!(
                connection = %id,
                kind = %message.kind(),
                version = ?version,
                "Handshake rejected"
            );
            self.deliver(id, &Message::error(message.id().cloned(), "unsupported"), cx);
            self.close(id, CloseReason::HANDSHAKE_FAILED, cx);
            return Ok(());
        }

        if let Some(timer) = self
            .connections
            .get_mut(id)
            .and_then(Connection::take_handshake_timer)
        {
            cx.cancel(timer);
        }
        self.connections.transition(id, ConnectionState::Open)?;
        let welcome = message.reply(
            MessageType::Welcome,
            Value::object([
                ("protocol", Value::from(PROTOCOL_VERSION)),
                ("connection", Value::from(id.to_string())),
                ("instance", Value::from(self.instance.to_string())),
            ]),
        );
        self.deliver(id, &welcome, cx);
        Ok(())
    }

    fn dispatch(&mut self, id: ConnectionId, message: &Message, cx: &mut Cx<'_>) {
        let Some(session) = self.connections.session_mut(id) else {
            return;
        };
        let routed = self.router.route(Request {
            connection: id,
            message,
            session,
        });
        match routed {
            Ok(action) => self.perform(id, message.id().cloned(), action, cx),
            Err(e) => {
                tracing::debug!(
                    connection = %id,
                    kind = %message.kind(),
                    error = %e,
                    "Request rejected"
                );
                self.fail(id, message.id().cloned(), e.reason(), cx);
            }
        }
    }

    fn perform(
        &mut self,
        id: ConnectionId,
        correlation: Option<CorrelationId>,
        action: Action,
        cx: &mut Cx<'_>,
    ) {
        match action {
            Action::Reply { kind, payload } => self.respond(id, correlation, kind, payload, cx),
            Action::Store { op, reply } => {
                let call = self.pending.insert(
                    id,
                    correlation,
                    CallKind::Store {
                        op: op.clone(),
                        reply,
                    },
                );
                self.arm_timeout(call, self.config.call_timeout, cx);
                self.spawn_store(call, 1, op, cx);
            }
            Action::Fetch { request } => {
                let call = self.pending.insert(id, correlation, CallKind::Fetch);
                let deadline = request.timeout.unwrap_or(self.config.call_timeout);
                self.arm_timeout(call, deadline, cx);
                self.spawn_fetch(call, request, cx);
            }
            Action::Subscribe { topic } => {
                self.connections.subscribe(id, &topic);
                let payload = Value::object([("topic", Value::from(topic))]);
                self.respond(id, correlation, MessageType::Subscribed, payload, cx);
            }
            Action::Unsubscribe { topic } => {
                self.connections.unsubscribe(id, &topic);
                let payload = Value::object([("topic", Value::from(topic))]);
                self.respond(id, correlation, MessageType::Unsubscribed, payload, cx);
            }
            Action::Publish { topic, data } => {
                let receivers = self.publish(&topic, data);
                let payload = Value::object([
                    ("topic", Value::from(topic)),
                    ("receivers", Value::from(receivers)),
                ]);
                self.respond(id, correlation, MessageType::Published, payload, cx);
            }
        }
    }

    /// Fan an `event` out to every subscriber. A full subscriber misses it.
    fn publish(&self, topic: &str, data: Value) -> usize {
        let event = Message::notification(
            MessageType::Event,
            Value::object([("topic", Value::from(topic)), ("data", data)]),
        );
        let frame = encode(&event);
        let mut receivers = 0_usize;
        for subscriber in self.connections.subscribers(topic) {
            match self.connections.send_encoded(subscriber, frame.clone()) {
                Ok(()) => {
                    receivers = receivers.saturating_add(1);
                    GatewayStats::bump(&self.stats.messages_out);
                }
                Err(SendError::QueueFull) => {
                    GatewayStats::bump(&self.stats.sends_dropped);
                    tracing::debug!(connection = %subscriber, topic, "Subscriber queue full, event dropped");
                }
                Err(SendError::NotFound) => {}
            }
        }
        receivers
    }

    fn arm_timeout(&mut self, call: CallId, after: std::time::Duration, cx: &mut Cx<'_>) {
        let timer = cx.schedule_once(after, Event::CallTimeout(call));
        if let Some(entry) = self.pending.get_mut(call) {
            entry.timeout = Some(timer);
        }
    }

    fn spawn_store(&mut self, call: CallId, attempt: u32, op: Operation, cx: &Cx<'_>) {
        let store = self.store.clone();
        let handle = cx.handle().clone();
        let task = tokio::spawn(async move {
            let result = store.execute(op).await;
            handle.post(Event::StoreDone {
                call,
                attempt,
                result,
            });
        });
        self.track(call, &task);
    }

    fn spawn_fetch(&mut self, call: CallId, request: CallRequest, cx: &Cx<'_>) {
        let outbound = self.outbound.clone();
        let handle = cx.handle().clone();
        let task = tokio::spawn(async move {
            let result = outbound.call(&request).await;
            handle.post(Event::FetchDone { call, result });
        });
        self.track(call, &task);
    }

    fn track(&mut self, call: CallId, task: &tokio::task::JoinHandle<()>) {
        if let Some(entry) = self.pending.get_mut(call) {
            entry.task = Some(task.abort_handle());
        }
    }

    fn on_store_done(
        &mut self,
        call: CallId,
        attempt: u32,
        result: Result<Reply, BackendError>,
        cx: &mut Cx<'_>,
    ) {
        let Some(entry) = self.pending.get_mut(call) else {
            tracing::debug!(%call, "Late store completion dropped");
            return;
        };
        if entry.attempt != attempt {
            return;
        }
        let retry = result.as_ref().err().is_some_and(|error| {
            entry.should_retry(error, &self.config.backend_retry)
                && self.connections.get(entry.connection).is_some()
        });
        if let (true, Err(error)) = (retry, &result) {
            let delay = self
                .config
                .backend_retry
                .delay_for(entry.attempt.saturating_sub(1));
            entry.attempt = entry.attempt.saturating_add(1);
            entry.task = None;
            tracing::debug!(
                %call,
                attempt = entry.attempt,
                error = %error,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Retrying store call"
            );
            cx.schedule_once(delay, Event::RetryCall(call));
            return;
        }

        let Some(entry) = self.pending.take(call) else {
            return;
        };
        let reply = entry.reply_kind();
        let outcome = result
            .map(|r| (reply, store_payload(reply, r)))
            .map_err(|e| e.reason());
        self.complete(entry, outcome, cx);
    }

    fn on_fetch_done(
        &mut self,
        call: CallId,
        result: Result<CallResponse, CallError>,
        cx: &mut Cx<'_>,
    ) {
        let Some(entry) = self.pending.take(call) else {
            tracing::debug!(%call, "Late upstream completion dropped");
            return;
        };
        let outcome = result
            .map(|r| (MessageType::FetchResult, fetch_payload(&r)))
            .map_err(|e| e.reason());
        self.complete(entry, outcome, cx);
    }

    /// Fail the call and stop its attempt, so an operation still queued for
    /// the store never runs after the client was told it timed out.
    fn on_call_timeout(&mut self, call: CallId, cx: &mut Cx<'_>) {
        if let Some(mut entry) = self.pending.take(call) {
            entry.timeout = None;
            if entry.task.is_some() {
                tracing::debug!(%call, attempt = entry.attempt, "Aborting timed out call");
            }
            self.complete(entry, Err("timeout"), cx);
        }
    }

    fn on_retry_call(&mut self, call: CallId, cx: &mut Cx<'_>) {
        let Some(entry) = self.pending.get(call) else {
            return;
        };
        if self.connections.get(entry.connection).is_none() {
            if let Some(entry) = self.pending.take(call) {
                self.complete(entry, Err("connection_lost"), cx);
            }
            return;
        }
        if let CallKind::Store { op, .. } = &entry.kind {
            let (attempt, op) = (entry.attempt, op.clone());
            self.spawn_store(call, attempt, op, cx);
        }
    }

    /// Answer a finished call, unless its connection has gone.
    fn complete(
        &mut self,
        mut entry: PendingCall,
        outcome: Result<(MessageType, Value), &'static str>,
        cx: &mut Cx<'_>,
    ) {
        if let Some(timer) = entry.timeout {
            cx.cancel(timer);
        }
        entry.abort();
        let elapsed_ms = u64::try_from(entry.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        if self.connections.get(entry.connection).is_none() {
            GatewayStats::bump(&self.stats.calls_discarded);
            tracing::debug!(
                connection = %entry.connection,
                elapsed_ms,
                "Completion for closed connection discarded"
            );
            return;
        }
        match outcome {
            Ok((kind, payload)) => {
                tracing::debug!(connection = %entry.connection, %kind, elapsed_ms, "Call completed");
                self.respond(entry.connection, entry.correlation, kind, payload, cx);
            }
            Err(reason) => {
                tracing::warn!(connection = %entry.connection, reason, elapsed_ms, "Call failed");
                self.fail(entry.connection, entry.correlation, reason, cx);
            }
        }
    }

    /// Send a response, unless the request was fire-and-forget.
    fn respond(
        &mut self,
        id: ConnectionId,
        correlation: Option<CorrelationId>,
        kind: MessageType,
        payload: Value,
        cx: &mut Cx<'_>,
    ) {
        if correlation.is_some() {
            self.deliver(id, &Message::new(kind, correlation, payload), cx);
        }
    }

    /// Send an `error`, or only log it for fire-and-forget requests.
    fn fail(
        &mut self,
        id: ConnectionId,
        correlation: Option<CorrelationId>,
        reason: &str,
        cx: &mut Cx<'_>,
    ) {
        if correlation.is_some() {
            self.deliver(id, &Message::error(correlation, reason), cx);
        } else {
            tracing::warn!(connection = %id, reason, "Fire-and-forget request failed");
        }
    }

    fn deliver(&mut self, id: ConnectionId, message: &Message, cx: &mut Cx<'_>) {
        let retries = match self.config.overflow {
            OverflowPolicy::Drop => 0,
            OverflowPolicy::Retry { attempts, .. } => attempts,
        };
        self.deliver_frame(id, encode(message), retries, cx);
    }

    fn deliver_frame(&mut self, id: ConnectionId, frame: String, remaining: u32, cx: &mut Cx<'_>) {
        let retry_delay = match self.config.overflow {
            OverflowPolicy::Retry { delay, .. } if remaining > 0 => Some(delay),
            _ => None,
        };
        // The frame is only kept when it may be needed for a retry.
        let kept = retry_delay.map(|_| frame.clone());
        match self.connections.send_encoded(id, frame) {
            Ok(()) => GatewayStats::bump(&self.stats.messages_out),
            Err(SendError::QueueFull) => match (retry_delay, kept) {
                (Some(delay), Some(frame)) => {
                    tracing::debug!(connection = %id, remaining, "Outbound queue full, retrying");
                    cx.schedule_once(
                        delay,
                        Event::RetrySend {
                            id,
                            frame,
                            remaining: remaining.saturating_sub(1),
                        },
                    );
                }
                _ => {
                    GatewayStats::bump(&self.stats.sends_dropped);
                    tracing::warn!(connection = %id, "Outbound queue full, message dropped");
                }
            },
            Err(SendError::NotFound) => {
                tracing::debug!(connection = %id, "Recipient gone, message discarded");
            }
        }
    }

    /// Close gracefully, arming the drain timer if the connection drains.
    fn close(&mut self, id: ConnectionId, reason: CloseReason, cx: &mut Cx<'_>) {
        let was_draining = self.connections.state(id) == Some(ConnectionState::Draining);
        match self.connections.close(id, reason) {
            Some(CloseOutcome::Closed(conn)) => Self::release(&conn, cx),
            Some(CloseOutcome::Draining) if !was_draining => {
                let timer = cx.schedule_once(self.config.drain_timeout, Event::DrainTimeout { id });
                if let Some(conn) = self.connections.get_mut(id) {
                    conn.set_drain_timer(timer);
                }
            }
            Some(CloseOutcome::Draining) | None => {}
        }
    }

    fn close_now(&mut self, id: ConnectionId, reason: CloseReason, cx: &mut Cx<'_>) {
        if let Some(conn) = self.connections.close_now(id, reason) {
            Self::release(&conn, cx);
        }
    }

    fn release(conn: &Connection, cx: &mut Cx<'_>) {
        for timer in conn.timers() {
            cx.cancel(timer);
        }
    }

    fn sweep_idle(&mut self, cx: &mut Cx<'_>) {
        let Some(cutoff) = Instant::now().checked_sub(self.config.idle_timeout) else {
            return;
        };
        for id in self.connections.idle_since(cutoff) {
            tracing::info!(connection = %id, "Closing idle connection");
            self.close_now(id, CloseReason::IDLE, cx);
        }
    }

    fn report(&self, cx: &Cx<'_>) {
        let reactor = cx.handle().stats();
        let gateway = self.stats.snapshot();
        tracing::debug!(
            events = reactor.events_dispatched,
            timers_fired = reactor.timers_fired,
            timers_pending = reactor.timers_pending,
            callback_errors = reactor.callback_errors,
            connections = gateway.connections,
            messages_in = gateway.messages_in,
            messages_out = gateway.messages_out,
            sends_dropped = gateway.sends_dropped,
            calls_pending = gateway.calls_pending,
            "Gateway stats"
        );
    }

    fn publish_stats(&self) {
        let live = u64::try_from(self.connections.len()).unwrap_or(u64::MAX);
        let pending = u64::try_from(self.pending.len()).unwrap_or(u64::MAX);
        self.stats.connections.store(live, Ordering::Relaxed);
        self.stats.calls_pending.store(pending, Ordering::Relaxed);
    }
}

impl PendingCall {
    const fn reply_kind(&self) -> MessageType {
        match &self.kind {
            CallKind::Store { reply, .. } => *reply,
            CallKind::Fetch => MessageType::FetchResult,
        }
    }
}

impl EventHandler for Gateway {
    type Event = Event;
    type Error = GatewayError;

    fn on_start(&mut self, cx: &mut Cx<'_>) {
        cx.schedule_repeating(self.config.idle_sweep_interval, || Event::IdleSweep);
        cx.schedule_repeating(self.config.stats_interval, || Event::StatsReport);
        tracing::info!(instance = %self.instance, "Gateway started");
    }

    fn handle(&mut self, event: Event, cx: &mut Cx<'_>) -> Result<(), GatewayError> {
        let result = match event {
            Event::Accepted { link, ack } => self.on_accepted(link, ack, cx),
            Event::Inbound { id, bytes } => self.on_inbound(id, &bytes, cx),
            Event::Activity { id } => {
                self.connections.touch(id);
                Ok(())
            }
            Event::PeerClosed { id } => {
                self.close(id, CloseReason::PEER, cx);
                Ok(())
            }
            Event::TransportFailed { id, error } => {
                if self.connections.get(id).is_some() {
                    tracing::warn!(connection = %id, error = %error, "Transport failed");
                    self.close_now(id, CloseReason::INTERNAL, cx);
                }
                Ok(())
            }
            Event::Drained { id } => {
                if let Some(conn) = self.connections.finish_drain(id) {
                    Self::release(&conn, cx);
                }
                Ok(())
            }
            Event::HandshakeTimeout { id } => {
                let handshaking = self
                    .connections
                    .get_mut(id)
                    .filter(|conn| conn.state() == ConnectionState::Handshaking);
                if let Some(conn) = handshaking {
                    conn.take_handshake_timer();
                    tracing::warn!(connection = %id, "Handshake timed out");
                    self.close(id, CloseReason::HANDSHAKE_TIMEOUT, cx);
                }
                Ok(())
            }
            Event::DrainTimeout { id } => {
                if self.connections.state(id) == Some(ConnectionState::Draining) {
                    tracing::warn!(connection = %id, "Drain timed out");
                    self.close_now(id, CloseReason::INTERNAL, cx);
                }
                Ok(())
            }
            Event::StoreDone {
                call,
                attempt,
                result,
            } => {
                self.on_store_done(call, attempt, result, cx);
                Ok(())
            }
            Event::FetchDone { call, result } => {
                self.on_fetch_done(call, result, cx);
                Ok(())
            }
            Event::CallTimeout(call) => {
                self.on_call_timeout(call, cx);
                Ok(())
            }
            Event::RetryCall(call) => {
                self.on_retry_call(call, cx);
                Ok(())
            }
            Event::RetrySend {
                id,
                frame,
                remaining,
            } => {
                self.deliver_frame(id, frame, remaining, cx);
                Ok(())
            }
            Event::IdleSweep => {
                self.sweep_idle(cx);
                Ok(())
            }
            Event::StatsReport => {
                self.report(cx);
                Ok(())
            }
        };
        self.publish_stats();
        result
    }

    fn on_error(&mut self, error: GatewayError, cx: &mut Cx<'_>) {
        if let GatewayError::InvalidTransition { id, .. } = error {
            self.close_now(id, CloseReason::INTERNAL, cx);
        }
        self.publish_stats();
    }

    fn on_shutdown(&mut self, cx: &mut Cx<'_>) {
        self.stopping = true;
        let ids = self.connections.ids();
        tracing::info!(connections = ids.len(), "Closing connections for shutdown");
        for id in ids {
            self.close(id, CloseReason::SHUTDOWN, cx);
        }
        self.publish_stats();
    }

    fn is_drained(&self) -> bool {
        self.connections.is_empty()
    }
}
