//! Gateway configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use switchboard_protocol::DEFAULT_MAX_FRAME_BYTES;
use switchboard_types::{RetryPolicy, duration};

use crate::reactor::ReactorConfig;

/// What the router does when a reply finds the connection's outbound queue
/// full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Drop the reply and log it.
    Drop,
    /// Try again up to `attempts` more times, `delay` apart, then drop.
    Retry {
        /// Additional send attempts.
        attempts: u32,
        /// Delay between attempts.
        #[serde(with = "duration::millis", rename = "delay_ms")]
        delay: Duration,
    },
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        Self::Retry {
            attempts: 3,
            delay: Duration::from_millis(50),
        }
    }
}

/// Settings for the gateway core and its HTTP surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Interface to listen on.
    pub listen_host: String,
    /// Port to listen on.
    pub listen_port: u16,
    /// Largest inbound frame, in bytes.
    pub max_frame_bytes: usize,
    /// Messages buffered per connection before sends fail with `QueueFull`.
    pub outbound_queue_capacity: usize,
    /// Live connections accepted before new upgrades are refused.
    pub max_connections: usize,
    /// Time a new connection has to send `hello`.
    #[serde(with = "duration::millis", rename = "handshake_timeout_ms")]
    pub handshake_timeout: Duration,
    /// Inactivity after which an open connection is closed.
    #[serde(with = "duration::millis", rename = "idle_timeout_ms")]
    pub idle_timeout: Duration,
    /// How often idle connections are looked for.
    #[serde(with = "duration::millis", rename = "idle_sweep_interval_ms")]
    pub idle_sweep_interval: Duration,
    /// Time a draining connection gets to flush before it is cut.
    #[serde(with = "duration::millis", rename = "drain_timeout_ms")]
    pub drain_timeout: Duration,
    /// Deadline for a store or upstream call, retries included.
    #[serde(with = "duration::millis", rename = "call_timeout_ms")]
    pub call_timeout: Duration,
    /// How often reactor counters are logged.
    #[serde(with = "duration::millis", rename = "stats_interval_ms")]
    pub stats_interval: Duration,
    /// Full-queue handling for replies.
    pub overflow: OverflowPolicy,
    /// Retry of store calls that failed because the store was away.
    pub backend_retry: RetryPolicy,
    /// Event loop tuning.
    pub reactor: ReactorConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_host: "0.0.0.0".to_owned(),
            listen_port: 8080,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            outbound_queue_capacity: 256,
            max_connections: 10_000,
            handshake_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
            idle_sweep_interval: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(5),
            call_timeout: Duration::from_secs(5),
            stats_interval: Duration::from_secs(30),
            overflow: OverflowPolicy::default(),
            backend_retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(1),
                jitter: true,
            },
            reactor: ReactorConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// `host:port` to bind.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
    }
}
