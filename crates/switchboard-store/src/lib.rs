//! Key-value store adapter for the Switchboard gateway.
//!
//! Callers build an [`Operation`], hand it to [`StoreAdapter::execute`] and
//! await a [`Reply`] or a [`BackendError`]. The adapter hides the link to the
//! store: connecting, detecting loss, backing off, and queueing or rejecting
//! calls while the store is away.
//!
//! # Modules
//!
//! - [`adapter`] -- [`StoreAdapter`] handle and the link supervisor
//! - [`backend`] -- [`Backend`] selection (Redis-compatible or in-memory)
//! - [`redis`] -- `fred`-based backend
//! - [`memory`] -- in-process backend with a reachability switch
//! - [`operation`] -- operations, replies and stored value encoding
//! - [`config`] -- [`StoreConfig`] and [`DisconnectPolicy`]
//! - [`error`] -- [`BackendError`]

pub mod adapter;
pub mod backend;
pub mod config;
pub mod error;
pub mod memory;
pub mod operation;
pub mod redis;

pub use adapter::{LinkState, StoreAdapter};
pub use backend::Backend;
pub use config::{DisconnectPolicy, StoreConfig};
pub use error::BackendError;
pub use memory::MemoryStore;
pub use operation::{Operation, Reply};
