//! Outbound HTTP calls from the Switchboard gateway to its upstream origin.
//!
//! [`OutboundClient::call`] sends a [`CallRequest`] and resolves to a
//! [`CallResponse`] (any status) or a [`CallError`]. Connect failures are
//! retried with backoff; nothing that may have reached the upstream is.

pub mod client;
pub mod config;
pub mod error;
pub mod request;

pub use client::OutboundClient;
pub use config::{OutboundConfig, UPSTREAM_URL_VAR};
pub use error::CallError;
pub use request::{CallRequest, CallResponse};
