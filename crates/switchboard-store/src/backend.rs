//! Backend selection, dispatched by enum.

use crate::config::StoreConfig;
use crate::error::BackendError;
use crate::memory::MemoryStore;
use crate::operation::{Operation, Reply};
use crate::redis::{RedisBackend, RedisLink};

/// Where operations go.
#[derive(Debug, Clone)]
pub enum Backend {
    /// A Redis-compatible server.
    Redis(RedisBackend),
    /// The in-process map.
    Memory(MemoryStore),
}

impl Backend {
    /// Choose a backend from the store settings.
    pub fn from_config(config: &StoreConfig) -> Self {
        if config.is_memory() {
            Self::Memory(MemoryStore::new())
        } else {
            Self::Redis(RedisBackend::new(config))
        }
    }

    /// Short name for logs and `/health`.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Redis(_) => "redis",
            Self::Memory(_) => "memory",
        }
    }

    /// Open a link. `on_lost` runs once when the link later drops.
    pub(crate) async fn connect<F>(&self, on_lost: F) -> Result<Link, BackendError>
    where
        F: FnOnce() + Send + 'static,
    {
        match self {
            Self::Redis(backend) => backend.connect(on_lost).await.map(Link::Redis),
            Self::Memory(store) => {
                store.connect()?;
                let watched = store.clone();
                tokio::spawn(async move {
                    watched.lost().await;
                    on_lost();
                });
                Ok(Link::Memory(store.clone()))
            }
        }
    }
}

/// An established connection to a backend.
#[derive(Clone)]
pub(crate) enum Link {
    Redis(RedisLink),
    Memory(MemoryStore),
}

impl Link {
    pub(crate) async fn execute(&self, op: &Operation) -> Result<Reply, BackendError> {
        match self {
            Self::Redis(link) => link.execute(op).await,
            Self::Memory(store) => store.execute(op).await,
        }
    }

    pub(crate) async fn close(&self) {
        if let Self::Redis(link) = self {
            link.close().await;
        }
    }
}
