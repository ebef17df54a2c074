//! Gateway error types.

use switchboard_types::ConnectionId;

use crate::connection::ConnectionState;

/// Errors surfaced by the gateway runtime and its reactor callbacks.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The listen address could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The HTTP server stopped with an error.
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),

    /// A connection was asked to move along an edge its state machine
    /// does not have.
    #[error("connection {id}: illegal transition {from} -> {to}")]
    InvalidTransition {
        /// Connection.
        id: ConnectionId,
        /// Current state.
        from: ConnectionState,
        /// Requested state.
        to: ConnectionState,
    },

    /// The arena has no free slot ids left.
    #[error("connection table is full")]
    TableFull,

    /// The reactor task is gone.
    #[error("reactor is not running")]
    ReactorStopped,
}

/// A message could not be queued for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The connection's outbound queue is at capacity.
    #[error("outbound queue full")]
    QueueFull,

    /// The connection is closed, closing, or never existed.
    #[error("connection not found")]
    NotFound,
}
