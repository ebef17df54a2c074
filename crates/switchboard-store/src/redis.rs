//! Redis-compatible store backend over a single multiplexed `fred` client.
//!
//! # Key layout
//!
//! | Operation | Command | Stored form |
//! |-----------|---------|-------------|
//! | `get` / `set` / `delete` | `GET` / `SET [PX]` / `DEL` | JSON text |
//! | `incr` | `INCRBY` | Integer text |
//! | `hset` / `hgetall` | `HSET` / `HGETALL` | JSON text per field |
//!
//! `fred`'s own reconnect is left disabled and every command gets exactly
//! one attempt; reconnecting and the at-most-once rule are owned by the
//! adapter's supervisor.

use std::collections::HashMap;
use std::fmt::Write as _;

use fred::prelude::{
    Builder, Client, ClientLike, Config as RedisConfig, HashesInterface, KeysInterface,
};
use fred::types::Expiration;

use crate::config::StoreConfig;
use crate::error::BackendError;
use crate::operation::{Operation, Reply, decode_value, encode_value};

/// Connection settings for a Redis-compatible server.
#[derive(Debug, Clone)]
pub struct RedisBackend {
    config: StoreConfig,
}

impl RedisBackend {
    /// Wrap the store settings. Nothing connects until the supervisor asks.
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    fn url(&self) -> String {
        let mut url = format!("redis://{}", self.config.address());
        if let Some(db) = self.config.database {
            let _ = write!(url, "/{db}");
        }
        url
    }

    /// Open a fresh connection. `on_lost` runs once when it drops.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Command`] if the URL cannot be parsed, or
    /// the connection error classified by [`BackendError::from`].
    pub async fn connect<F>(&self, on_lost: F) -> Result<RedisLink, BackendError>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut config = RedisConfig::from_url(&self.url())
            .map_err(|e| BackendError::Command(format!("invalid store address: {e}")))?;
        config.username.clone_from(&self.config.username);
        config.password.clone_from(&self.config.password);
        config.fail_fast = true;

        let connect_timeout = self.config.connect_timeout;
        let client = Builder::from_config(config)
            .with_connection_config(|c| {
                c.connection_timeout = connect_timeout;
                c.max_command_attempts = 1;
            })
            .build()?;

        let handle = client.init().await?;
        tokio::spawn(async move {
            if let Ok(Err(e)) = handle.await {
                tracing::debug!(error = %e, "store connection task ended");
            }
            on_lost();
        });

        tracing::info!(address = %self.config.address(), "Connected to store");
        Ok(RedisLink { client })
    }
}

/// A live connection. Clones share the same pipelined connection.
#[derive(Clone)]
pub struct RedisLink {
    client: Client,
}

impl RedisLink {
    /// Run one operation.
    pub async fn execute(&self, op: &Operation) -> Result<Reply, BackendError> {
        match op {
            Operation::Get { key } => {
                let text: Option<String> = self.client.get(key.as_str()).await?;
                Ok(Reply::Value(text.as_deref().map(decode_value)))
            }
            Operation::Set { key, value, ttl } => {
                let text = encode_value(value)?;
                let expiry = ttl.map(|ttl| {
                    Expiration::PX(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
                });
                let _: () = self
                    .client
                    .set(key.as_str(), text, expiry, None, false)
                    .await?;
                Ok(Reply::Stored)
            }
            Operation::Delete { key } => {
                let removed: u64 = self.client.del(key.as_str()).await?;
                Ok(Reply::Count(removed))
            }
            Operation::Incr { key, by } => {
                let next: i64 = self.client.incr_by(key.as_str(), *by).await?;
                Ok(Reply::Integer(next))
            }
            Operation::HashSet { key, fields } => {
                let encoded = fields
                    .iter()
                    .map(|(field, value)| Ok((field.clone(), encode_value(value)?)))
                    .collect::<Result<HashMap<String, String>, BackendError>>()?;
                let created: u64 = self.client.hset(key.as_str(), encoded).await?;
                Ok(Reply::Count(created))
            }
            Operation::HashGetAll { key } => {
                let fields: HashMap<String, String> = self.client.hgetall(key.as_str()).await?;
                Ok(Reply::Fields(
                    fields
                        .into_iter()
                        .map(|(field, text)| {
                            let value = decode_value(&text);
                            (field, value)
                        })
                        .collect(),
                ))
            }
        }
    }

    /// Close the connection politely.
    pub async fn close(&self) {
        if let Err(e) = self.client.quit().await {
            tracing::debug!(error = %e, "store quit failed");
        }
    }
}
