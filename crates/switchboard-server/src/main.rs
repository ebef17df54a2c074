//! Switchboard gateway server.
//!
//! Terminates `WebSocket` clients at `/ws` and routes their messages to
//! session state, the key-value store, or the upstream HTTP origin.
//!
//! # Startup Sequence
//!
//! 1. Parse the command line
//! 2. Resolve configuration (defaults, YAML, environment, flags)
//! 3. Initialize structured logging
//! 4. Bind the listen address (fatal on failure)
//! 5. Start the store adapter and the outbound client
//! 6. Start the reactor and serve until interrupted
//!
//! The first interrupt drains connections and exits 0. A second interrupt
//! during the drain exits 130 at once.

mod cli;
mod config;
mod error;
mod logging;

use std::process::ExitCode;

use clap::Parser;
use switchboard_gateway::GatewayRuntime;
use switchboard_outbound::OutboundClient;
use switchboard_store::{Backend, StoreAdapter};
use tracing::{error, info, warn};

use crate::cli::Cli;
use crate::config::ServerConfig;
use crate::error::ServerError;

/// Exit status after a second interrupt.
const FORCED_EXIT: i32 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logging is not up yet, so config errors go to stderr.
    let config = match ServerConfig::load(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("switchboard-server: {e}");
            return ExitCode::FAILURE;
        }
    };
    logging::init(
        &logging::default_directive(cli.log_level.as_deref(), cli.verbose),
        cli.log_format,
    );

    match run(config).await {
        Ok(()) => {
            info!("switchboard-server shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "switchboard-server failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: ServerConfig) -> Result<(), ServerError> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.gateway.listen_addr(),
        store = %config.store.address(),
        upstream = config.outbound.base_url.as_deref().unwrap_or("<unset>"),
        call_timeout_ms = u64::try_from(config.gateway.call_timeout.as_millis()).unwrap_or(u64::MAX),
        "switchboard-server starting"
    );

    let listener = switchboard_gateway::bind(&config.gateway).await?;

    let store = StoreAdapter::start(Backend::from_config(&config.store), &config.store);
    info!(backend = store.backend_kind(), "Store adapter started");

    let outbound = OutboundClient::new(&config.outbound)?;
    if outbound.base_url().is_none() {
        warn!("SWITCHBOARD_UPSTREAM_URL is not set; fetch requests will fail");
    }

    let runtime = GatewayRuntime::start(config.gateway, store, outbound);
    let stats = runtime.serve(listener, shutdown_signal()).await?;
    info!(
        events = stats.events_dispatched,
        timers_fired = stats.timers_fired,
        callback_errors = stats.callback_errors,
        "Reactor drained"
    );
    Ok(())
}

/// Resolve on the first interrupt, then arm the forced exit.
async fn shutdown_signal() {
    wait_for_interrupt().await;
    info!("Interrupt received, shutting down");
    tokio::spawn(async {
        wait_for_interrupt().await;
        warn!("Second interrupt, exiting immediately");
        std::process::exit(FORCED_EXIT);
    });
}

#[cfg(unix)]
async fn wait_for_interrupt() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_interrupt() {
    let _ = tokio::signal::ctrl_c().await;
}
