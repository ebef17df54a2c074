//! End-to-end tests over real sockets.
//!
//! A [`GatewayRuntime`] serves on an ephemeral port with the in-memory store
//! and an axum upstream. Clients speak `WebSocket` through
//! `tokio-tungstenite`.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use switchboard_gateway::{GatewayConfig, GatewayRuntime, bind};
use switchboard_outbound::{OutboundClient, OutboundConfig};
use switchboard_store::{Backend, LinkState, MemoryStore, StoreAdapter, StoreConfig};
use switchboard_types::{RetryPolicy, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tower::ServiceExt;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn upstream() -> SocketAddr {
    let router = Router::new()
        .route("/fast", get(|| async { "ok" }))
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn memory_store() -> (MemoryStore, StoreAdapter) {
    let memory = MemoryStore::new();
    let adapter = StoreAdapter::start(
        Backend::Memory(memory.clone()),
        &StoreConfig {
            host: "memory".to_owned(),
            ..StoreConfig::default()
        },
    );
    adapter.wait_for_state(LinkState::Up).await;
    (memory, adapter)
}

fn outbound(upstream: SocketAddr) -> OutboundClient {
    OutboundClient::new(&OutboundConfig {
        base_url: Some(format!("http://{upstream}/")),
        retry: RetryPolicy::never(),
        ..OutboundConfig::default()
    })
    .unwrap()
}

struct Running {
    addr: SocketAddr,
    memory: MemoryStore,
    stop: oneshot::Sender<()>,
    server: JoinHandle<()>,
}

async fn start() -> Running {
    let (memory, store) = memory_store().await;
    let config = GatewayConfig {
        listen_host: "127.0.0.1".to_owned(),
        listen_port: 0,
        ..GatewayConfig::default()
    };
    let listener = bind(&config).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let runtime = GatewayRuntime::start(config, store, outbound(upstream().await));

    let (stop, stopped) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        runtime
            .serve(listener, async move {
                let _ = stopped.await;
            })
            .await
            .unwrap();
    });
    Running {
        addr,
        memory,
        stop,
        server,
    }
}

async fn open(addr: SocketAddr) -> Socket {
    let (mut socket, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    send(&mut socket, r#"{"type":"hello","id":"h","payload":{"protocol":1}}"#).await;
    let welcome = recv_json(&mut socket).await;
    assert_eq!(welcome["type"], "welcome");
    socket
}

async fn send(socket: &mut Socket, text: &str) {
    socket.send(Message::text(text)).await.unwrap();
}

async fn recv(socket: &mut Socket) -> Message {
    tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .expect("no frame within 5s")
        .expect("socket ended")
        .unwrap()
}

async fn recv_text(socket: &mut Socket) -> String {
    recv(socket).await.to_text().unwrap().to_owned()
}

async fn recv_json(socket: &mut Socket) -> serde_json::Value {
    serde_json::from_str(&recv_text(socket).await).unwrap()
}

#[tokio::test]
async fn get_over_websocket() {
    let running = start().await;
    running.memory.seed("k", &Value::from(5_i64)).unwrap();
    let mut socket = open(running.addr).await;

    send(&mut socket, r#"{"type":"get","id":"1","payload":{"key":"k"}}"#).await;

    assert_eq!(
        recv_text(&mut socket).await,
        r#"{"type":"get_result","id":"1","payload":{"value":5}}"#
    );
}

#[tokio::test]
async fn malformed_frame_leaves_socket_usable() {
    let running = start().await;
    let mut socket = open(running.addr).await;

    send(&mut socket, "{not json").await;
    assert_eq!(
        recv_text(&mut socket).await,
        r#"{"type":"error","id":null,"payload":{"reason":"malformed"}}"#
    );

    send(&mut socket, r#"{"type":"set","id":"2","payload":{"key":"a","value":[1,2]}}"#).await;
    assert_eq!(
        recv_json(&mut socket).await,
        json!({"type": "set_result", "id": "2", "payload": {"ok": true}})
    );
    assert_eq!(running.memory.peek("a"), Some(Value::from(vec![Value::from(1_i64), Value::from(2_i64)])));
}

#[tokio::test]
async fn fetch_past_its_deadline_times_out_and_client_recovers() {
    let running = start().await;
    let mut socket = open(running.addr).await;

    send(
        &mut socket,
        r#"{"type":"fetch","id":"2","payload":{"path":"/slow","timeout_ms":100}}"#,
    )
    .await;
    assert_eq!(
        recv_text(&mut socket).await,
        r#"{"type":"error","id":"2","payload":{"reason":"timeout"}}"#
    );

    send(&mut socket, r#"{"type":"fetch","id":"3","payload":{"path":"/fast"}}"#).await;
    let result = recv_json(&mut socket).await;
    assert_eq!(result["type"], "fetch_result");
    assert_eq!(result["id"], "3");
    assert_eq!(result["payload"]["status"], 200);
    assert_eq!(result["payload"]["body"], "ok");
}

#[tokio::test]
async fn oversized_frame_closes_with_1009() {
    let running = start().await;
    let mut socket = open(running.addr).await;

    let padding = "x".repeat(70_000);
    let huge = format!(r#"{{"type":"ping","id":"big","payload":{{"pad":"{padding}"}}}}"#);
    send(&mut socket, &huge).await;

    match recv(&mut socket).await {
        Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), 1009),
        other => panic!("expected close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn shutdown_sends_going_away() {
    let running = start().await;
    let mut socket = open(running.addr).await;

    running.stop.send(()).unwrap();

    match recv(&mut socket).await {
        Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), 1001),
        other => panic!("expected close frame, got {other:?}"),
    }
    tokio::time::timeout(Duration::from_secs(10), running.server)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn health_reports_ok() {
    let (_memory, store) = memory_store().await;
    let runtime = GatewayRuntime::start(
        GatewayConfig::default(),
        store,
        outbound(upstream().await),
    );

    let response = runtime
        .router()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let report: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(report["status"], "ok");
    assert_eq!(report["store"]["backend"], "memory");
    assert_eq!(report["store"]["link"], "up");
    assert_eq!(report["connections"], 0);
}
