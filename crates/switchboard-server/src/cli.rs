//! Command-line surface.
//!
//! Every flag can also be set through a `SWITCHBOARD_*` environment variable;
//! a flag given on the command line wins over the variable. Secrets have no
//! flag at all (see [`crate::config`]).

use std::path::PathBuf;

use clap::{ArgAction, Parser};

use crate::logging::LogFormat;

/// Switchboard real-time gateway.
#[derive(Debug, Clone, Parser)]
#[command(name = "switchboard-server", version, about)]
pub struct Cli {
    /// YAML config file. Flags and environment override its values.
    #[arg(long, env = "SWITCHBOARD_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Interface to listen on.
    #[arg(long, env = "SWITCHBOARD_LISTEN_HOST", value_name = "HOST")]
    pub listen_host: Option<String>,

    /// Port to listen on.
    #[arg(long, env = "SWITCHBOARD_LISTEN_PORT", value_name = "PORT")]
    pub listen_port: Option<u16>,

    /// Key-value store host, or `memory` for the in-process store.
    #[arg(long, env = "SWITCHBOARD_STORE_HOST", value_name = "HOST")]
    pub store_host: Option<String>,

    /// Key-value store port.
    #[arg(long, env = "SWITCHBOARD_STORE_PORT", value_name = "PORT")]
    pub store_port: Option<u16>,

    /// Deadline for store and upstream calls, in milliseconds.
    #[arg(
        long,
        env = "SWITCHBOARD_CALL_TIMEOUT_MS",
        value_name = "MS",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub call_timeout_ms: Option<u64>,

    /// Log filter, e.g. `info` or `switchboard_gateway=debug`.
    /// `RUST_LOG` takes precedence.
    #[arg(long, env = "SWITCHBOARD_LOG_LEVEL", value_name = "FILTER")]
    pub log_level: Option<String>,

    /// Log output format.
    #[arg(long, env = "SWITCHBOARD_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// More logging: `-v` debug, `-vv` trace.
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}
