//! In-process store backend.
//!
//! Behaves like a single Redis node for the operations the gateway issues,
//! with two operator controls the real store lacks: a reachability switch
//! that simulates the network dropping, and an artificial per-command
//! latency. Used for `--store-host memory` and throughout the tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use switchboard_types::Value;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::BackendError;
use crate::operation::{Operation, Reply, decode_value, encode_value};

#[derive(Debug)]
enum Entry {
    Text {
        text: String,
        expires_at: Option<Instant>,
    },
    Hash(BTreeMap<String, String>),
}

#[derive(Debug)]
struct Shared {
    data: Mutex<HashMap<String, Entry>>,
    reachable: watch::Sender<bool>,
    executed: AtomicU64,
    latency_ms: AtomicU64,
}

/// Handle to an in-process key-value map. Clones share the same data.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty, reachable store.
    pub fn new() -> Self {
        let (reachable, _) = watch::channel(true);
        Self {
            shared: Arc::new(Shared {
                data: Mutex::new(HashMap::new()),
                reachable,
                executed: AtomicU64::new(0),
                latency_ms: AtomicU64::new(0),
            }),
        }
    }

    /// Simulate the network to the store going down or coming back.
    pub fn set_reachable(&self, reachable: bool) {
        self.shared.reachable.send_replace(reachable);
    }

    /// Whether the store is currently reachable.
    pub fn is_reachable(&self) -> bool {
        *self.shared.reachable.borrow()
    }

    /// Delay every command by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.shared.latency_ms.store(ms, Ordering::Relaxed);
    }

    /// Number of commands that actually took effect.
    pub fn executed_count(&self) -> u64 {
        self.shared.executed.load(Ordering::Relaxed)
    }

    /// Write a value directly, bypassing reachability and the counter.
    pub fn seed(&self, key: &str, value: &Value) -> Result<(), BackendError> {
        let text = encode_value(value)?;
        self.data().insert(
            key.to_owned(),
            Entry::Text {
                text,
                expires_at: None,
            },
        );
        Ok(())
    }

    /// Read a value directly, bypassing reachability and the counter.
    pub fn peek(&self, key: &str) -> Option<Value> {
        let data = self.data();
        match data.get(key) {
            Some(Entry::Text { text, expires_at }) if !is_expired(*expires_at) => {
                Some(decode_value(text))
            }
            _ => None,
        }
    }

    pub(crate) fn connect(&self) -> Result<(), BackendError> {
        if self.is_reachable() {
            Ok(())
        } else {
            Err(BackendError::Unavailable)
        }
    }

    /// Resolve once the store becomes unreachable.
    pub(crate) async fn lost(&self) {
        let mut rx = self.shared.reachable.subscribe();
        let _ = rx.wait_for(|reachable| !*reachable).await;
    }

    pub(crate) async fn execute(&self, op: &Operation) -> Result<Reply, BackendError> {
        let latency = self.shared.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if !self.is_reachable() {
            return Err(BackendError::ConnectionLost);
        }
        let reply = self.apply(op)?;
        self.shared.executed.fetch_add(1, Ordering::Relaxed);
        Ok(reply)
    }

    fn data(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.shared
            .data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn apply(&self, op: &Operation) -> Result<Reply, BackendError> {
        let mut data = self.data();
        let expired = matches!(
            data.get(op.key()),
            Some(Entry::Text { expires_at, .. }) if is_expired(*expires_at)
        );
        if expired {
            data.remove(op.key());
        }

        match op {
            Operation::Get { key } => match data.get(key) {
                None => Ok(Reply::Value(None)),
                Some(Entry::Text { text, .. }) => Ok(Reply::Value(Some(decode_value(text)))),
                Some(Entry::Hash(_)) => Err(wrong_type()),
            },
            Operation::Set { key, value, ttl } => {
                let text = encode_value(value)?;
                let expires_at = ttl.and_then(|ttl| Instant::now().checked_add(ttl));
                data.insert(key.clone(), Entry::Text { text, expires_at });
                Ok(Reply::Stored)
            }
            Operation::Delete { key } => Ok(Reply::Count(u64::from(data.remove(key).is_some()))),
            Operation::Incr { key, by } => {
                let (current, expires_at) = match data.get(key) {
                    None => (0, None),
                    Some(Entry::Text { text, expires_at }) => (
                        text.parse::<i64>().map_err(|_err| not_an_integer())?,
                        *expires_at,
                    ),
                    Some(Entry::Hash(_)) => return Err(wrong_type()),
                };
                let next = current.checked_add(*by).ok_or_else(not_an_integer)?;
                data.insert(
                    key.clone(),
                    Entry::Text {
                        text: next.to_string(),
                        expires_at,
                    },
                );
                Ok(Reply::Integer(next))
            }
            Operation::HashSet { key, fields } => {
                let hash = match data
                    .entry(key.clone())
                    .or_insert_with(|| Entry::Hash(BTreeMap::new()))
                {
                    Entry::Hash(hash) => hash,
                    Entry::Text { .. } => return Err(wrong_type()),
                };
                let mut created = 0_u64;
                for (field, value) in fields {
                    if hash.insert(field.clone(), encode_value(value)?).is_none() {
                        created = created.saturating_add(1);
                    }
                }
                Ok(Reply::Count(created))
            }
            Operation::HashGetAll { key } => match data.get(key) {
                None => Ok(Reply::Fields(BTreeMap::new())),
                Some(Entry::Hash(hash)) => Ok(Reply::Fields(
                    hash.iter()
                        .map(|(field, text)| (field.clone(), decode_value(text)))
                        .collect(),
                )),
                Some(Entry::Text { .. }) => Err(wrong_type()),
            },
        }
    }
}

fn is_expired(expires_at: Option<Instant>) -> bool {
    expires_at.is_some_and(|at| at <= Instant::now())
}

fn wrong_type() -> BackendError {
    BackendError::Command(
        "WRONGTYPE Operation against a key holding the wrong kind of value".to_owned(),
    )
}

fn not_an_integer() -> BackendError {
    BackendError::Command("ERR value is not an integer or out of range".to_owned())
}
