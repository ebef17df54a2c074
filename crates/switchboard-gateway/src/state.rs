//! Shared state for the HTTP handlers.
//!
//! Handlers never see connection state. They hold a [`ReactorHandle`] to
//! post into the gateway, plus the read-only counters `/health` reports.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use switchboard_store::StoreAdapter;
use switchboard_types::InstanceId;

use crate::gateway::{Event, GatewayStats};
use crate::reactor::ReactorHandle;

/// State cloned into every axum handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Handle into the gateway's reactor.
    pub reactor: ReactorHandle<Event>,
    /// Gateway counters.
    pub stats: Arc<GatewayStats>,
    /// Store adapter, for its link state.
    pub store: StoreAdapter,
    /// Id of this gateway process.
    pub instance: InstanceId,
    /// When the gateway started.
    pub started_at: DateTime<Utc>,
    /// Largest accepted `WebSocket` message.
    pub max_frame_bytes: usize,
    /// Outbound queue capacity per connection.
    pub queue_capacity: usize,
}
