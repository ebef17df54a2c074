//! Error types for the store adapter.
//!
//! [`BackendError`] is what a caller of
//! [`StoreAdapter::execute`](crate::StoreAdapter::execute) sees. The
//! distinction between [`BackendError::Unavailable`] and
//! [`BackendError::ConnectionLost`] matters: the first means the operation
//! was never sent, the second means its outcome is unknown.

use fred::error::{Error as RedisError, ErrorKind as RedisErrorKind};

/// Errors surfaced by the store adapter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The store is not reachable and the operation was not sent.
    #[error("store unavailable")]
    Unavailable,

    /// The connection dropped while the operation was in flight.
    #[error("store connection lost mid-call")]
    ConnectionLost,

    /// The store did not answer within the command timeout.
    #[error("store command timed out")]
    Timeout,

    /// The store rejected the command.
    #[error("store command failed: {0}")]
    Command(String),

    /// A value could not be encoded for storage.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The adapter is shutting down.
    #[error("store adapter shut down")]
    Shutdown,
}

impl BackendError {
    /// Reason string sent to clients in an `error` response.
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Unavailable | Self::Shutdown => "unavailable",
            Self::ConnectionLost => "connection_lost",
            Self::Timeout => "timeout",
            Self::Command(_) | Self::Serialization(_) => "backend_error",
        }
    }

    /// Whether this error means the link to the store is gone.
    pub const fn is_link_failure(&self) -> bool {
        matches!(self, Self::ConnectionLost)
    }
}

impl From<RedisError> for BackendError {
    fn from(err: RedisError) -> Self {
        match err.kind() {
            RedisErrorKind::IO | RedisErrorKind::Canceled => Self::ConnectionLost,
            RedisErrorKind::Timeout => Self::Timeout,
            _ => Self::Command(err.details().to_owned()),
        }
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
