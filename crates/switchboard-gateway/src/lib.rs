//! Real-time gateway core for Switchboard.
//!
//! Clients connect over `WebSocket`, exchange JSON envelopes, and get
//! answers from session state, the key-value store, or an upstream HTTP
//! origin. All connection and session state is owned by one reactor task;
//! everything slow runs on other tasks and posts its result back.
//!
//! # Modules
//!
//! - [`reactor`] -- single-task event loop with timers
//! - [`arena`] -- generational slots behind [`ConnectionId`](switchboard_types::ConnectionId)
//! - [`connection`] -- connection state machine, outbound queues, topic index
//! - [`session`] -- per-connection key/value state and subscriptions
//! - [`router`] -- dispatch table from message type to handler
//! - [`pending`] -- calls awaiting the store or upstream
//! - [`gateway`] -- the reactor's event handler tying it together
//! - [`transport`] -- `WebSocket` reader and writer tasks
//! - [`server`] -- axum router, `/health`, runtime lifecycle
//! - [`state`] -- shared handler state
//! - [`config`] -- [`GatewayConfig`]
//! - [`error`] -- [`GatewayError`] and [`SendError`]

pub mod arena;
pub mod config;
pub mod connection;
pub mod error;
pub mod gateway;
pub mod pending;
pub mod reactor;
pub mod router;
pub mod server;
pub mod session;
pub mod state;
pub mod transport;

pub use config::{GatewayConfig, OverflowPolicy};
pub use connection::{CloseReason, ConnectionManager, ConnectionState, Control, LinkEnds, TransportLink};
pub use error::{GatewayError, SendError};
pub use gateway::{Event, Gateway, GatewayStats, PROTOCOL_VERSION};
pub use reactor::{Reactor, ReactorConfig, ReactorHandle, ReactorStats};
pub use server::{GatewayRuntime, bind, build_router};
pub use state::AppState;
