//! Outbound client configuration.
//!
//! The upstream base URL is a secret-adjacent deployment detail and is read
//! only from `SWITCHBOARD_UPSTREAM_URL`. Everything else can come from the
//! config file.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use switchboard_types::{RetryPolicy, duration};

/// Environment variable holding the upstream base URL.
pub const UPSTREAM_URL_VAR: &str = "SWITCHBOARD_UPSTREAM_URL";

/// Settings for [`OutboundClient`](crate::OutboundClient).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboundConfig {
    /// Base URL every request path is resolved against.
    #[serde(skip)]
    pub base_url: Option<String>,
    /// Default per-attempt timeout, covering connect through body.
    #[serde(with = "duration::millis", rename = "timeout_ms")]
    pub timeout: Duration,
    /// Timeout for establishing a TCP/TLS connection.
    #[serde(with = "duration::millis", rename = "connect_timeout_ms")]
    pub connect_timeout: Duration,
    /// Idle pooled connections kept per host.
    pub pool_max_idle_per_host: usize,
    /// How long an idle pooled connection is kept.
    #[serde(with = "duration::millis", rename = "pool_idle_timeout_ms")]
    pub pool_idle_timeout: Duration,
    /// Redirects followed before giving up.
    pub max_redirects: usize,
    /// Retry budget for transient connect failures.
    pub retry: RetryPolicy,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(2),
            pool_max_idle_per_host: 8,
            pool_idle_timeout: Duration::from_secs(90),
            max_redirects: 5,
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(50),
                max_delay: Duration::from_secs(1),
                jitter: true,
            },
        }
    }
}

impl OutboundConfig {
    /// Read the base URL using `lookup`.
    pub fn with_base_url_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        self.base_url = lookup(UPSTREAM_URL_VAR)
            .map(|url| url.trim().to_owned())
            .filter(|url| !url.is_empty());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_base_url_is_unset() {
        let config = OutboundConfig::default().with_base_url_from(|_| Some("  ".to_owned()));
        assert_eq!(config.base_url, None);
    }

    #[test]
    fn base_url_is_trimmed() {
        let config = OutboundConfig::default()
            .with_base_url_from(|_| Some(" http://upstream:8080/api/ ".to_owned()));
        assert_eq!(config.base_url.as_deref(), Some("http://upstream:8080/api/"));
    }
}
