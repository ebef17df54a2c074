//! Typed wire messages.
//!
//! A [`Message`] is the decoded form of one envelope:
//! `{"type": ..., "id": ..., "payload": ...}`. It is immutable once built;
//! responses are new messages carrying the request's [`CorrelationId`].

use serde::{Deserialize, Serialize};

use crate::ids::CorrelationId;
use crate::value::Value;

/// Every message tag the gateway understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    // Requests (client -> gateway)
    /// Protocol handshake.
    Hello,
    /// Liveness check answered locally.
    Ping,
    /// Read a key from the store.
    Get,
    /// Write a key to the store.
    Set,
    /// Remove a key from the store.
    Delete,
    /// Atomically add to an integer key.
    Incr,
    /// Write several fields of a hash.
    Hset,
    /// Read every field of a hash.
    Hgetall,
    /// Read a per-connection session value.
    SessionGet,
    /// Write a per-connection session value.
    SessionSet,
    /// Join a topic.
    Subscribe,
    /// Leave a topic.
    Unsubscribe,
    /// Fan a payload out to a topic.
    Publish,
    /// Proxy an HTTP request to the upstream origin.
    Fetch,

    // Responses (gateway -> client)
    /// Handshake accepted.
    Welcome,
    /// Answer to `ping`.
    Pong,
    /// Answer to `get`.
    GetResult,
    /// Answer to `set`.
    SetResult,
    /// Answer to `delete`.
    DeleteResult,
    /// Answer to `incr`.
    IncrResult,
    /// Answer to `hset`.
    HsetResult,
    /// Answer to `hgetall`.
    HgetallResult,
    /// Answer to `session_get` / `session_set`.
    SessionResult,
    /// Answer to `subscribe`.
    Subscribed,
    /// Answer to `unsubscribe`.
    Unsubscribed,
    /// Answer to `publish`.
    Published,
    /// A payload published on a subscribed topic.
    Event,
    /// Answer to `fetch`.
    FetchResult,
    /// Failure answer to any request.
    Error,
}

impl MessageType {
    /// All tags, in declaration order.
    pub const ALL: [Self; 29] = [
        Self::Hello,
        Self::Ping,
        Self::Get,
        Self::Set,
        Self::Delete,
        Self::Incr,
        Self::Hset,
        Self::Hgetall,
        Self::SessionGet,
        Self::SessionSet,
        Self::Subscribe,
        Self::Unsubscribe,
        Self::Publish,
        Self::Fetch,
        Self::Welcome,
        Self::Pong,
        Self::GetResult,
        Self::SetResult,
        Self::DeleteResult,
        Self::IncrResult,
        Self::HsetResult,
        Self::HgetallResult,
        Self::SessionResult,
        Self::Subscribed,
        Self::Unsubscribed,
        Self::Published,
        Self::Event,
        Self::FetchResult,
        Self::Error,
    ];

    /// Wire tag.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hello => "hello",
            Self::Ping => "ping",
            Self::Get => "get",
            Self::Set => "set",
            Self::Delete => "delete",
            Self::Incr => "incr",
            Self::Hset => "hset",
            Self::Hgetall => "hgetall",
            Self::SessionGet => "session_get",
            Self::SessionSet => "session_set",
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::Publish => "publish",
            Self::Fetch => "fetch",
            Self::Welcome => "welcome",
            Self::Pong => "pong",
            Self::GetResult => "get_result",
            Self::SetResult => "set_result",
            Self::DeleteResult => "delete_result",
            Self::IncrResult => "incr_result",
            Self::HsetResult => "hset_result",
            Self::HgetallResult => "hgetall_result",
            Self::SessionResult => "session_result",
            Self::Subscribed => "subscribed",
            Self::Unsubscribed => "unsubscribed",
            Self::Published => "published",
            Self::Event => "event",
            Self::FetchResult => "fetch_result",
            Self::Error => "error",
        }
    }

    /// Parse a wire tag. Returns `None` for tags the gateway does not know.
    pub fn parse(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == tag)
    }

    /// Whether clients may send this tag.
    pub const fn is_request(self) -> bool {
        matches!(
            self,
            Self::Hello
                | Self::Ping
                | Self::Get
                | Self::Set
                | Self::Delete
                | Self::Incr
                | Self::Hset
                | Self::Hgetall
                | Self::SessionGet
                | Self::SessionSet
                | Self::Subscribe
                | Self::Unsubscribe
                | Self::Publish
                | Self::Fetch
        )
    }
}

impl core::fmt::Display for MessageType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    kind: MessageType,
    id: Option<CorrelationId>,
    payload: Value,
}

impl Message {
    /// Build a message.
    pub const fn new(kind: MessageType, id: Option<CorrelationId>, payload: Value) -> Self {
        Self { kind, id, payload }
    }

    /// Build a fire-and-forget message (no correlation id).
    pub const fn notification(kind: MessageType, payload: Value) -> Self {
        Self::new(kind, None, payload)
    }

    /// Build an `error` response with a `reason` payload.
    pub fn error(id: Option<CorrelationId>, reason: &str) -> Self {
        Self::new(
            MessageType::Error,
            id,
            Value::object([("reason", Value::from(reason))]),
        )
    }

    /// Build a response to `self`, carrying its correlation id.
    pub fn reply(&self, kind: MessageType, payload: Value) -> Self {
        Self::new(kind, self.id.clone(), payload)
    }

    /// Message tag.
    pub const fn kind(&self) -> MessageType {
        self.kind
    }

    /// Correlation id, absent on fire-and-forget messages.
    pub const fn id(&self) -> Option<&CorrelationId> {
        self.id.as_ref()
    }

    /// Structured payload.
    pub const fn payload(&self) -> &Value {
        &self.payload
    }
}
