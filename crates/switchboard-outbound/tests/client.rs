//! Integration tests for the outbound client against local axum servers.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect};
use axum::routing::{get, post};
use switchboard_outbound::{CallError, CallRequest, OutboundClient, OutboundConfig};
use switchboard_types::RetryPolicy;
use tokio::net::TcpListener;

async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn client_for(base: &str) -> OutboundClient {
    OutboundClient::new(&OutboundConfig {
        base_url: Some(base.to_owned()),
        timeout: Duration::from_secs(2),
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: false,
        },
        ..OutboundConfig::default()
    })
    .unwrap()
}

async fn echo(headers: HeaderMap, body: String) -> impl IntoResponse {
    let tag = headers
        .get("x-tag")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    ([("x-seen", tag)], format!("echo:{body}"))
}

async fn unavailable(State(hits): State<Arc<AtomicUsize>>) -> StatusCode {
    hits.fetch_add(1, Ordering::SeqCst);
    StatusCode::SERVICE_UNAVAILABLE
}

async fn slow() -> &'static str {
    tokio::time::sleep(Duration::from_millis(500)).await;
    "late"
}

#[tokio::test]
async fn call_sends_body_and_headers_under_base_path() {
    let router = Router::new().route("/api/echo", post(echo));
    let addr = serve(router).await;
    let client = client_for(&format!("http://{addr}/api"));

    let request = CallRequest::new("post", "/echo")
        .header("x-tag", "t1")
        .body("hi");
    let response = client.call(&request).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body_text(), "echo:hi");
    assert_eq!(response.header("X-Seen"), Some("t1"));
}

#[tokio::test]
async fn error_status_is_returned_without_retry() {
    let hits = Arc::new(AtomicUsize::new(0));
    let router = Router::new()
        .route("/down", get(unavailable))
        .with_state(Arc::clone(&hits));
    let addr = serve(router).await;
    let client = client_for(&format!("http://{addr}/"));

    let response = client.call(&CallRequest::get("/down")).await.unwrap();
    assert_eq!(response.status, 503);
    assert!(!response.is_success());
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn timeout_leaves_client_usable() {
    let router = Router::new()
        .route("/slow", get(slow))
        .route("/fast", get(|| async { "ok" }));
    let addr = serve(router).await;
    let client = client_for(&format!("http://{addr}/"));

    let timed_out = client
        .call(&CallRequest::get("/slow").timeout(Duration::from_millis(50)))
        .await;
    assert_eq!(timed_out, Err(CallError::Timeout));

    let response = client.call(&CallRequest::get("/fast")).await.unwrap();
    assert_eq!(response.body_text(), "ok");
}

#[tokio::test]
async fn refused_connection_is_connect_failed() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let client = client_for(&format!("http://{addr}/"));

    let result = client.call(&CallRequest::get("/anything")).await;
    assert!(
        matches!(result, Err(CallError::ConnectFailed(_))),
        "{result:?}"
    );
}

#[tokio::test]
async fn redirect_loop_is_cut_off() {
    let router = Router::new().route("/loop", get(|| async { Redirect::temporary("/loop") }));
    let addr = serve(router).await;
    let client = client_for(&format!("http://{addr}/"));

    let result = client.call(&CallRequest::get("/loop")).await;
    assert_eq!(result, Err(CallError::TooManyRedirects));
}

#[tokio::test]
async fn redirect_off_origin_is_not_followed() {
    let router = Router::new().route(
        "/away",
        get(|| async { Redirect::temporary("http://127.0.0.1:9/elsewhere") }),
    );
    let addr = serve(router).await;
    let client = client_for(&format!("http://{addr}/"));

    let response = client.call(&CallRequest::get("/away")).await.unwrap();
    assert_eq!(response.status, 307);
    assert_eq!(
        response.header("location"),
        Some("http://127.0.0.1:9/elsewhere")
    );
}

#[tokio::test]
async fn unconfigured_client_refuses_calls() {
    let client = OutboundClient::new(&OutboundConfig::default()).unwrap();
    let result = client.call(&CallRequest::get("/x")).await;
    assert_eq!(result, Err(CallError::NotConfigured));
}
