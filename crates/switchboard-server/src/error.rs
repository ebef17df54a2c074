//! Error types for the server binary.

use std::path::PathBuf;

/// Top-level error for the server binary.
///
/// Everything here is fatal at startup; once the gateway is serving, errors
/// stay inside the reactor.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The config file could not be read.
    #[error("cannot read config file {}: {source}", path.display())]
    ConfigRead {
        /// File that was requested.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config file is not valid YAML for [`ServerConfig`](crate::config::ServerConfig).
    #[error("cannot parse config file {}: {source}", path.display())]
    ConfigParse {
        /// File that was parsed.
        path: PathBuf,
        /// Parser error.
        source: serde_yml::Error,
    },

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The outbound client could not be built.
    #[error("outbound client error: {source}")]
    Outbound {
        /// The underlying client error.
        #[from]
        source: switchboard_outbound::CallError,
    },

    /// The gateway failed to bind or serve.
    #[error("gateway error: {source}")]
    Gateway {
        /// The underlying gateway error.
        #[from]
        source: switchboard_gateway::GatewayError,
    },
}
