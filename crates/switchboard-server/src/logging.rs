//! Tracing subscriber setup.

use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Filter directive used when `RUST_LOG` is unset.
///
/// `--log-level` wins over `-v`; without either the level is `info`.
pub fn default_directive(log_level: Option<&str>, verbose: u8) -> String {
    match (log_level, verbose) {
        (Some(level), _) if !level.trim().is_empty() => level.trim().to_owned(),
        (_, 0) => "info".to_owned(),
        (_, 1) => "debug".to_owned(),
        _ => "trace".to_owned(),
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `directive`. An unparsable directive
/// falls back to `info`.
pub fn init(directive: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directive))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
