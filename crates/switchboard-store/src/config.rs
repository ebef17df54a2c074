//! Store adapter configuration.
//!
//! Connection settings come from the config file and CLI; credentials only
//! ever come from the environment:
//!
//! - `SWITCHBOARD_STORE_USERNAME` -- ACL user name (optional)
//! - `SWITCHBOARD_STORE_PASSWORD` -- password (optional)

use std::time::Duration;

use serde::{Deserialize, Serialize};
use switchboard_types::RetryPolicy;
use switchboard_types::duration;

/// Host name that selects the in-process memory backend.
pub const MEMORY_HOST: &str = "memory";

/// What to do with operations submitted while the store is unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DisconnectPolicy {
    /// Hold up to `max` operations until the link comes back; beyond that,
    /// fail with `Unavailable`.
    Queue {
        /// Queue bound.
        max: usize,
    },
    /// Fail every operation with `Unavailable` immediately.
    FailFast,
}

impl Default for DisconnectPolicy {
    fn default() -> Self {
        Self::Queue { max: 1024 }
    }
}

/// Settings for [`StoreAdapter`](crate::StoreAdapter).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Store host, or `memory` for the in-process backend.
    pub host: String,
    /// Store port.
    pub port: u16,
    /// Logical database index.
    pub database: Option<u8>,
    /// Timeout for establishing a connection.
    #[serde(with = "duration::millis", rename = "connect_timeout_ms")]
    pub connect_timeout: Duration,
    /// Timeout for a single command.
    #[serde(with = "duration::millis", rename = "command_timeout_ms")]
    pub command_timeout: Duration,
    /// Reconnect backoff. `max_attempts` is ignored: the adapter keeps
    /// trying for as long as it runs.
    pub reconnect: RetryPolicy,
    /// Behaviour while disconnected.
    pub disconnect_policy: DisconnectPolicy,
    /// ACL user name.
    #[serde(skip)]
    pub username: Option<String>,
    /// Password.
    #[serde(skip)]
    pub password: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 6379,
            database: None,
            connect_timeout: Duration::from_secs(2),
            command_timeout: Duration::from_secs(5),
            reconnect: RetryPolicy {
                max_attempts: u32::MAX,
                base_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(5),
                jitter: true,
            },
            disconnect_policy: DisconnectPolicy::default(),
            username: None,
            password: None,
        }
    }
}

impl StoreConfig {
    /// Fill in credentials from the environment.
    pub fn with_env_credentials(self) -> Self {
        self.with_credentials_from(|name| std::env::var(name).ok())
    }

    /// Fill in credentials using `lookup` to read variables.
    pub fn with_credentials_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        self.username = lookup("SWITCHBOARD_STORE_USERNAME").filter(|s| !s.is_empty());
        self.password = lookup("SWITCHBOARD_STORE_PASSWORD").filter(|s| !s.is_empty());
        self
    }

    /// Whether this selects the in-process backend.
    pub fn is_memory(&self) -> bool {
        self.host.eq_ignore_ascii_case(MEMORY_HOST)
    }

    /// `host:port`, for logs.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
