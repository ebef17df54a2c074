//! Integration tests for the store adapter's link supervision.
//!
//! Everything runs against the in-memory backend with Tokio's clock paused,
//! so backoff delays elapse instantly. The one test that needs a live
//! Redis-compatible server is `#[ignore]`d:
//!
//! ```bash
//! docker run --rm -p 6379:6379 redis:7
//! cargo test -p switchboard-store -- --ignored
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::BTreeMap;
use std::time::Duration;

use switchboard_store::{
    Backend, BackendError, DisconnectPolicy, LinkState, MemoryStore, Operation, Reply,
    StoreAdapter, StoreConfig,
};
use switchboard_types::{RetryPolicy, Value};

fn config(policy: DisconnectPolicy) -> StoreConfig {
    StoreConfig {
        host: "memory".to_owned(),
        command_timeout: Duration::from_secs(1),
        reconnect: RetryPolicy {
            max_attempts: u32::MAX,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            jitter: false,
        },
        disconnect_policy: policy,
        ..StoreConfig::default()
    }
}

fn start(store: &MemoryStore, policy: DisconnectPolicy) -> StoreAdapter {
    StoreAdapter::start(Backend::Memory(store.clone()), &config(policy))
}

fn get(key: &str) -> Operation {
    Operation::Get {
        key: key.to_owned(),
    }
}

fn incr(key: &str) -> Operation {
    Operation::Incr {
        key: key.to_owned(),
        by: 1,
    }
}

#[tokio::test(start_paused = true)]
async fn get_returns_stored_value() {
    let store = MemoryStore::new();
    store.seed("k", &Value::from(5_i64)).unwrap();
    let adapter = start(&store, DisconnectPolicy::default());

    let reply = adapter.execute(get("k")).await;
    assert_eq!(reply, Ok(Reply::Value(Some(Value::Int(5)))));
    assert_eq!(adapter.link_state(), LinkState::Up);
    assert_eq!(adapter.backend_kind(), "memory");
}

#[tokio::test(start_paused = true)]
async fn queued_call_runs_once_after_reconnect() {
    let store = MemoryStore::new();
    store.set_reachable(false);
    let adapter = start(&store, DisconnectPolicy::default());
    adapter.wait_for_state(LinkState::Backoff).await;

    let pending = tokio::spawn({
        let adapter = adapter.clone();
        async move { adapter.execute(incr("visits")).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!pending.is_finished());
    assert_eq!(store.executed_count(), 0);

    store.set_reachable(true);
    assert_eq!(pending.await.unwrap(), Ok(Reply::Integer(1)));
    assert_eq!(store.executed_count(), 1);
    assert_eq!(store.peek("visits"), Some(Value::Int(1)));
}

#[tokio::test(start_paused = true)]
async fn fail_fast_rejects_while_disconnected() {
    let store = MemoryStore::new();
    store.set_reachable(false);
    let adapter = start(&store, DisconnectPolicy::FailFast);
    adapter.wait_for_state(LinkState::Backoff).await;

    assert_eq!(
        adapter.execute(get("k")).await,
        Err(BackendError::Unavailable)
    );
    assert_eq!(store.executed_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn queue_bound_rejects_overflow() {
    let store = MemoryStore::new();
    store.set_reachable(false);
    let adapter = start(&store, DisconnectPolicy::Queue { max: 2 });
    adapter.wait_for_state(LinkState::Backoff).await;

    let queued: Vec<_> = (0..2)
        .map(|_| {
            let adapter = adapter.clone();
            tokio::spawn(async move { adapter.execute(incr("n")).await })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(
        adapter.execute(incr("n")).await,
        Err(BackendError::Unavailable)
    );

    store.set_reachable(true);
    let mut results = Vec::new();
    for handle in queued {
        results.push(handle.await.unwrap());
    }
    results.sort_by_key(|r| match r {
        Ok(Reply::Integer(n)) => *n,
        _ => 0,
    });
    assert_eq!(results, [Ok(Reply::Integer(1)), Ok(Reply::Integer(2))]);
    assert_eq!(store.executed_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn abandoned_queued_call_is_not_sent() {
    let store = MemoryStore::new();
    store.set_reachable(false);
    let adapter = start(&store, DisconnectPolicy::default());
    adapter.wait_for_state(LinkState::Backoff).await;

    let abandoned = tokio::spawn({
        let adapter = adapter.clone();
        async move { adapter.execute(incr("n")).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    abandoned.abort();
    assert!(abandoned.await.is_err());

    store.set_reachable(true);
    adapter.wait_for_state(LinkState::Up).await;
    assert_eq!(adapter.execute(get("n")).await, Ok(Reply::Value(None)));
    assert_eq!(store.executed_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn in_flight_call_is_not_replayed_after_loss() {
    let store = MemoryStore::new();
    let adapter = start(&store, DisconnectPolicy::default());
    adapter.wait_for_state(LinkState::Up).await;

    store.set_latency(Duration::from_millis(100));
    let in_flight = tokio::spawn({
        let adapter = adapter.clone();
        async move { adapter.execute(incr("n")).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    store.set_reachable(false);

    assert_eq!(in_flight.await.unwrap(), Err(BackendError::ConnectionLost));
    assert_ne!(adapter.link_state(), LinkState::Up);

    store.set_latency(Duration::ZERO);
    store.set_reachable(true);
    adapter.wait_for_state(LinkState::Up).await;
    assert_eq!(store.executed_count(), 0);
    assert_eq!(store.peek("n"), None);

    // The caller resubmits explicitly.
    assert_eq!(adapter.execute(incr("n")).await, Ok(Reply::Integer(1)));
    assert_eq!(store.executed_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn slow_command_times_out() {
    let store = MemoryStore::new();
    let adapter = start(&store, DisconnectPolicy::default());
    adapter.wait_for_state(LinkState::Up).await;

    store.set_latency(Duration::from_secs(5));
    assert_eq!(adapter.execute(get("k")).await, Err(BackendError::Timeout));
    assert_eq!(adapter.link_state(), LinkState::Up);
}

#[tokio::test]
#[ignore = "requires a Redis-compatible server on localhost:6379"]
async fn redis_backend_round_trip() {
    let config = StoreConfig::default().with_env_credentials();
    let adapter = StoreAdapter::start(Backend::from_config(&config), &config);
    adapter.wait_for_state(LinkState::Up).await;

    let key = format!("switchboard:test:{}", std::process::id());
    let fields: BTreeMap<String, Value> = [("a".to_owned(), Value::from(1_i64))]
        .into_iter()
        .collect();

    let set = Operation::Set {
        key: key.clone(),
        value: Value::from("v"),
        ttl: Some(Duration::from_secs(30)),
    };
    assert_eq!(adapter.execute(set).await, Ok(Reply::Stored));
    assert_eq!(
        adapter.execute(get(&key)).await,
        Ok(Reply::Value(Some(Value::from("v"))))
    );
    assert_eq!(
        adapter.execute(Operation::Delete { key: key.clone() }).await,
        Ok(Reply::Count(1))
    );

    let hash_key = format!("{key}:h");
    adapter
        .execute(Operation::HashSet {
            key: hash_key.clone(),
            fields: fields.clone(),
        })
        .await
        .expect("hset");
    assert_eq!(
        adapter
            .execute(Operation::HashGetAll {
                key: hash_key.clone()
            })
            .await,
        Ok(Reply::Fields(fields))
    );
    adapter
        .execute(Operation::Delete { key: hash_key })
        .await
        .expect("cleanup");
}
