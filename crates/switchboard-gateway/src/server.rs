//! HTTP surface and runtime lifecycle.
//!
//! [`GatewayRuntime::start`] spawns the reactor with a [`Gateway`] handler;
//! [`GatewayRuntime::serve`] runs axum on a bound listener until the shutdown
//! future resolves, then lets the reactor close every connection and drain.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use switchboard_outbound::OutboundClient;
use switchboard_store::{LinkState, StoreAdapter};
use switchboard_types::InstanceId;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::gateway::{Gateway, GatewayStats, GatewayStatsSnapshot};
use crate::reactor::{Reactor, ReactorStats};
use crate::state::AppState;
use crate::transport;

/// Build the axum router.
///
/// - `GET /ws` -- `WebSocket` upgrade into the gateway
/// - `GET /health` -- JSON status report
///
/// CORS allows any origin; the gateway carries no cookies or credentials.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(transport::ws_upgrade))
        .route("/health", get(health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// `ok`, or `degraded` when the store link is down or the reactor stopped.
    pub status: &'static str,
    /// Id of this gateway process.
    pub instance: InstanceId,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// Seconds since start.
    pub uptime_secs: i64,
    /// Live connections.
    pub connections: u64,
    /// Store adapter state.
    pub store: StoreHealth,
    /// Reactor counters.
    pub reactor: ReactorStats,
    /// Gateway counters.
    pub gateway: GatewayStatsSnapshot,
}

/// Store part of [`HealthReport`].
#[derive(Debug, Clone, Serialize)]
pub struct StoreHealth {
    /// `redis` or `memory`.
    pub backend: &'static str,
    /// Link state.
    pub link: LinkState,
}

async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    let link = state.store.link_state();
    let running = !state.reactor.is_closed();
    let gateway = state.stats.snapshot();
    Json(HealthReport {
        status: if running && link == LinkState::Up {
            "ok"
        } else {
            "degraded"
        },
        instance: state.instance,
        started_at: state.started_at,
        uptime_secs: Utc::now()
            .signed_duration_since(state.started_at)
            .num_seconds(),
        connections: gateway.connections,
        store: StoreHealth {
            backend: state.store.backend_kind(),
            link,
        },
        reactor: state.reactor.stats(),
        gateway,
    })
}

/// Bind the configured listen address.
///
/// # Errors
///
/// [`GatewayError::Bind`] if the address is taken or invalid.
pub async fn bind(config: &GatewayConfig) -> Result<TcpListener, GatewayError> {
    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| GatewayError::Bind { addr, source })?;
    if let Ok(local) = listener.local_addr() {
        tracing::info!(addr = %local, "Gateway listening");
    }
    Ok(listener)
}

/// A running reactor plus the state the HTTP surface needs.
#[derive(Debug)]
pub struct GatewayRuntime {
    state: AppState,
    reactor: JoinHandle<ReactorStats>,
}

impl GatewayRuntime {
    /// Spawn the reactor. Must be called inside a tokio runtime.
    pub fn start(config: GatewayConfig, store: StoreAdapter, outbound: OutboundClient) -> Self {
        let reactor = Reactor::new(config.reactor);
        let stats = Arc::new(GatewayStats::default());
        let instance = InstanceId::new();
        let state = AppState {
            reactor: reactor.handle(),
            stats: Arc::clone(&stats),
            store: store.clone(),
            instance,
            started_at: Utc::now(),
            max_frame_bytes: config.max_frame_bytes,
            queue_capacity: config.outbound_queue_capacity,
        };
        let gateway = Gateway::new(config, store, outbound, instance, stats);
        let reactor = tokio::spawn(reactor.run(gateway));
        Self { state, reactor }
    }

    /// Router for this runtime.
    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Serve HTTP on `listener` until `shutdown` resolves, then shut the
    /// reactor down and wait for it to drain.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Serve`] if the server fails, or
    /// [`GatewayError::ReactorStopped`] if the reactor task panicked.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<ReactorStats, GatewayError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let handle = self.state.reactor.clone();
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.await;
                tracing::info!("Shutdown requested, draining connections");
                handle.shutdown();
            })
            .await;

        // Covers the server failing without a shutdown request.
        self.state.reactor.shutdown();
        let stats = self
            .reactor
            .await
            .map_err(|_err| GatewayError::ReactorStopped)?;
        served.map_err(GatewayError::Serve)?;
        tracing::info!(
            events = stats.events_dispatched,
            timers_fired = stats.timers_fired,
            callback_errors = stats.callback_errors,
            "Gateway stopped"
        );
        Ok(stats)
    }
}
