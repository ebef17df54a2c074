//! Configuration layering for the server binary.
//!
//! Values are resolved in this order, later layers winning:
//!
//! 1. Built-in defaults of each crate's config struct
//! 2. The YAML file named by `--config`
//! 3. `SWITCHBOARD_*` environment variables
//! 4. Command-line flags
//!
//! Layers 3 and 4 arrive together through [`Cli`], whose flags are backed by
//! environment variables. Secrets are never taken from the file or flags:
//!
//! - `SWITCHBOARD_STORE_USERNAME`, `SWITCHBOARD_STORE_PASSWORD`
//! - `SWITCHBOARD_UPSTREAM_URL`
//!
//! # Example
//!
//! ```yaml
//! gateway:
//!   listen_port: 8080
//!   idle_timeout_ms: 30000
//!   overflow: { mode: retry, attempts: 3, delay_ms: 50 }
//! store:
//!   host: redis.internal
//!   disconnect_policy: { mode: fail_fast }
//! outbound:
//!   pool_max_idle_per_host: 16
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use switchboard_gateway::GatewayConfig;
use switchboard_outbound::OutboundConfig;
use switchboard_store::StoreConfig;

use crate::cli::Cli;
use crate::error::ServerError;

/// Complete server configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Gateway core and HTTP surface.
    pub gateway: GatewayConfig,
    /// Key-value store adapter.
    pub store: StoreConfig,
    /// Upstream HTTP client.
    pub outbound: OutboundConfig,
}

impl ServerConfig {
    /// Resolve the configuration for `cli`, reading secrets from the process
    /// environment.
    pub fn load(cli: &Cli) -> Result<Self, ServerError> {
        Self::load_with(cli, |name| std::env::var(name).ok())
    }

    /// Resolve the configuration for `cli`, reading secrets through `lookup`.
    pub fn load_with(
        cli: &Cli,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ServerError> {
        let mut config = match &cli.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_cli(cli);
        config.store = config.store.with_credentials_from(&lookup);
        config.outbound = config.outbound.with_base_url_from(&lookup);
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML config file.
    pub fn from_file(path: &Path) -> Result<Self, ServerError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ServerError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yml::from_str(&contents).map_err(|source| ServerError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay flag and environment values.
    ///
    /// `--call-timeout-ms` bounds every backend call: the router's deadline,
    /// the store's command timeout, and the outbound client's default timeout.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(host) = &cli.listen_host {
            self.gateway.listen_host.clone_from(host);
        }
        if let Some(port) = cli.listen_port {
            self.gateway.listen_port = port;
        }
        if let Some(host) = &cli.store_host {
            self.store.host.clone_from(host);
        }
        if let Some(port) = cli.store_port {
            self.store.port = port;
        }
        if let Some(ms) = cli.call_timeout_ms {
            let timeout = Duration::from_millis(ms);
            self.gateway.call_timeout = timeout;
            self.store.command_timeout = timeout;
            self.outbound.timeout = timeout;
        }
    }

    /// Reject values the gateway cannot run with.
    pub fn validate(&self) -> Result<(), ServerError> {
        let gateway = &self.gateway;
        let checks = [
            (gateway.outbound_queue_capacity == 0, "gateway.outbound_queue_capacity must be at least 1"),
            (gateway.max_frame_bytes == 0, "gateway.max_frame_bytes must be at least 1"),
            (gateway.max_connections == 0, "gateway.max_connections must be at least 1"),
            (gateway.call_timeout.is_zero(), "gateway.call_timeout_ms must be positive"),
            (gateway.handshake_timeout.is_zero(), "gateway.handshake_timeout_ms must be positive"),
            (gateway.idle_timeout.is_zero(), "gateway.idle_timeout_ms must be positive"),
            (gateway.drain_timeout.is_zero(), "gateway.drain_timeout_ms must be positive"),
            (gateway.idle_sweep_interval.is_zero(), "gateway.idle_sweep_interval_ms must be positive"),
            (gateway.stats_interval.is_zero(), "gateway.stats_interval_ms must be positive"),
            (self.store.host.trim().is_empty(), "store.host must not be empty"),
        ];
        checks
            .iter()
            .find(|(failed, _)| *failed)
            .map_or(Ok(()), |(_, message)| {
                Err(ServerError::InvalidConfig((*message).to_owned()))
            })
    }
}
