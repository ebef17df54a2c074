//! Shared data model for the Switchboard gateway.
//!
//! Every other crate in the workspace depends on these types; nothing here
//! performs I/O.
//!
//! # Modules
//!
//! - [`ids`] -- Connection, correlation, call and instance identifiers
//! - [`value`] -- Closed tagged-variant payload value
//! - [`message`] -- Message tags and the immutable [`Message`] envelope
//! - [`retry`] -- Exponential backoff with jitter
//! - [`duration`] -- Millisecond serde helpers for config structs

pub mod duration;
pub mod ids;
pub mod message;
pub mod retry;
pub mod value;

pub use ids::{CallId, ConnectionId, CorrelationId, InstanceId};
pub use message::{Message, MessageType};
pub use retry::RetryPolicy;
pub use value::{Value, ValueError};
