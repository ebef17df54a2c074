//! Store operations and their replies.
//!
//! Values are stored as JSON text so any [`Value`] survives a round trip
//! through the store. Text written by other clients that is not valid JSON
//! reads back as a plain string.

use std::collections::BTreeMap;
use std::time::Duration;

use switchboard_types::Value;

use crate::error::BackendError;

/// One command for the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Read a key.
    Get {
        /// Key to read.
        key: String,
    },
    /// Write a key, optionally expiring it.
    Set {
        /// Key to write.
        key: String,
        /// Value to store.
        value: Value,
        /// Time to live.
        ttl: Option<Duration>,
    },
    /// Remove a key.
    Delete {
        /// Key to remove.
        key: String,
    },
    /// Add `by` to an integer key, creating it at zero.
    Incr {
        /// Counter key.
        key: String,
        /// Amount to add (may be negative).
        by: i64,
    },
    /// Write several fields of a hash in one command.
    HashSet {
        /// Hash key.
        key: String,
        /// Fields to write.
        fields: BTreeMap<String, Value>,
    },
    /// Read every field of a hash.
    HashGetAll {
        /// Hash key.
        key: String,
    },
}

impl Operation {
    /// Command name for logs.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Get { .. } => "get",
            Self::Set { .. } => "set",
            Self::Delete { .. } => "delete",
            Self::Incr { .. } => "incr",
            Self::HashSet { .. } => "hset",
            Self::HashGetAll { .. } => "hgetall",
        }
    }

    /// Key the operation touches.
    pub fn key(&self) -> &str {
        match self {
            Self::Get { key }
            | Self::Set { key, .. }
            | Self::Delete { key }
            | Self::Incr { key, .. }
            | Self::HashSet { key, .. }
            | Self::HashGetAll { key } => key,
        }
    }

    /// Whether running the operation twice has the same effect as once.
    ///
    /// Only reads qualify; `set` is idempotent in isolation but not when
    /// interleaved with other writers.
    pub const fn is_read(&self) -> bool {
        matches!(self, Self::Get { .. } | Self::HashGetAll { .. })
    }
}

/// Successful result of an [`Operation`].
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Result of `get`; `None` when the key is absent.
    Value(Option<Value>),
    /// Result of `set`.
    Stored,
    /// Number of keys removed (`delete`) or new fields created (`hset`).
    Count(u64),
    /// Counter value after `incr`.
    Integer(i64),
    /// Result of `hgetall`; empty when the key is absent.
    Fields(BTreeMap<String, Value>),
}

impl Reply {
    /// Convert into the payload value returned to clients.
    pub fn into_value(self) -> Value {
        match self {
            Self::Value(value) => value.unwrap_or_default(),
            Self::Stored => Value::Bool(true),
            Self::Count(n) => i64::try_from(n).map_or(Value::Null, Value::Int),
            Self::Integer(n) => Value::Int(n),
            Self::Fields(fields) => Value::Object(fields),
        }
    }
}

/// Encode a value as stored text.
pub fn encode_value(value: &Value) -> Result<String, BackendError> {
    Ok(serde_json::to_string(value)?)
}

/// Decode stored text into a value.
pub fn decode_value(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_owned()))
}
