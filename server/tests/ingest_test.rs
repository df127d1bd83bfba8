//! End-to-end tests between a real monitor and the ingest server.
//!
//! Each test binds the ingest router to an ephemeral local port, points an
//! `aiko_monitor::Monitor` at it, and inspects what the server stored.

use std::net::SocketAddr;
use std::time::Duration;

use aiko_ingest::config::Config as ServerConfig;
use aiko_ingest::routes::{create_router, AppState, INGEST_PATH};
use aiko_ingest::store::EventStore;
use aiko_monitor::middleware::{capture, VERSION_HEADER};
use aiko_monitor::{
    Body, Config, Event, Headers, Monitor, RetryPolicy, SecretKey, MASK,
};
use axum::body::{to_bytes, Body as HttpBody};
use axum::http::{Request, StatusCode};
use axum::routing::post;
use axum::{middleware, Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower::ServiceExt;

const PROJECT_KEY: &str = "pk_AAAAAAAAAAAAAAAAAAAAAA";
const SECRET_KEY: &str = "BBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB";
const OTHER_SECRET_KEY: &str = "CCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCC";

// ============================================================================
// Test Helpers
// ============================================================================

/// Starts the ingest server and returns its address and store.
async fn start_server(capacity: usize) -> (SocketAddr, EventStore) {
    let mut config = ServerConfig::new(PROJECT_KEY, SecretKey::decode(SECRET_KEY).unwrap());
    config.capacity = capacity;
    let state = AppState::new(config);
    let store = state.store.clone();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, create_router(state)).await.unwrap();
    });

    (addr, store)
}

fn monitor_config(addr: SocketAddr, project_key: &str, secret: &str) -> Config {
    Config::new(project_key, secret)
        .with_endpoint(format!("http://127.0.0.1:{}{INGEST_PATH}", addr.port()))
        .with_retry_policy(RetryPolicy::fast_for_tests())
}

fn checkout_event() -> Event {
    let mut headers = Headers::new();
    headers.insert("X-Real-IP".to_string(), "192.0.2.44".to_string());
    headers.insert("Cookie".to_string(), "sid=abc123".to_string());

    Event::new("POST", "/checkout?step=2", 201)
        .with_request_headers(headers)
        .with_request_body(Body::from(json!({
            "card": {"last4": "4111", "secret": "123"},
            "email": "buyer@example.com"
        })))
        .with_response_body(Body::from(json!({"order_id": 991})))
        .with_duration(Duration::from_millis(35))
}

// ============================================================================
// Delivery
// ============================================================================

#[tokio::test]
async fn test_monitor_delivers_redacted_event_to_server() {
    let (addr, store) = start_server(100).await;

    let monitor = Monitor::new(monitor_config(addr, PROJECT_KEY, SECRET_KEY)).unwrap();
    monitor.enqueue(checkout_event());
    monitor.shutdown(Duration::from_secs(5)).await.unwrap();

    assert_eq!(monitor.stats().delivered, 1);
    let stored = store.snapshot(None);
    assert_eq!(stored.len(), 1);

    let received = &stored[0];
    assert_eq!(received.client_ip.as_deref(), Some("192.0.2.44"));
    assert_eq!(received.event.endpoint, "/checkout");
    assert_eq!(received.event.status_code, 201);
    assert_eq!(received.event.duration_ms, 35);
    assert_eq!(received.event.request_headers["cookie"], MASK);
    assert_eq!(received.event.request_headers["x-real-ip"], MASK);

    let body = serde_json::to_value(&received.event.request_body).unwrap();
    assert_eq!(body["card"]["last4"], json!("4111"));
    assert_eq!(body["card"]["secret"], json!(MASK));
    assert_eq!(body["email"], json!(MASK));
}

#[tokio::test]
async fn test_wrong_secret_is_forbidden_and_not_retried() {
    let (addr, store) = start_server(100).await;

    let monitor = Monitor::new(monitor_config(addr, PROJECT_KEY, OTHER_SECRET_KEY)).unwrap();
    monitor.enqueue(checkout_event());
    monitor.shutdown(Duration::from_secs(5)).await.unwrap();

    let stats = monitor.stats();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.delivered, 0);
    assert!(store.is_empty());
    assert_eq!(store.total_received(), 0);
}

#[tokio::test]
async fn test_wrong_project_key_is_unauthorized() {
    let (addr, store) = start_server(100).await;

    let monitor = Monitor::new(monitor_config(
        addr,
        "pk_ZZZZZZZZZZZZZZZZZZZZZZ",
        SECRET_KEY,
    ))
    .unwrap();
    monitor.enqueue(checkout_event());
    monitor.shutdown(Duration::from_secs(5)).await.unwrap();

    assert_eq!(monitor.stats().failed, 1);
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_store_retains_only_newest_events() {
    let (addr, store) = start_server(5).await;

    let monitor = Monitor::new(monitor_config(addr, PROJECT_KEY, SECRET_KEY)).unwrap();
    for i in 0..12 {
        monitor.enqueue(Event::new("GET", format!("/page/{i}"), 200));
    }
    monitor.shutdown(Duration::from_secs(10)).await.unwrap();

    assert_eq!(monitor.stats().delivered, 12);
    assert_eq!(store.total_received(), 12);
    assert_eq!(store.len(), 5);
}

// ============================================================================
// Capture layer through to the server
// ============================================================================

#[tokio::test]
async fn test_captured_request_reaches_server() {
    let (addr, store) = start_server(100).await;
    let monitor = Monitor::new(monitor_config(addr, PROJECT_KEY, SECRET_KEY)).unwrap();

    let app = Router::new()
        .route(
            "/login",
            post(|Json(body): Json<Value>| async move {
                Json(json!({"welcome": body["user"], "token": "tok_live"}))
            }),
        )
        .layer(middleware::from_fn_with_state(monitor.clone(), capture));

    let request = Request::builder()
        .method("POST")
        .uri("/login")
        .header("content-type", "application/json")
        .body(HttpBody::from(r#"{"user":"lin","password":"pw"}"#))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    to_bytes(response.into_body(), usize::MAX).await.unwrap();

    monitor.shutdown(Duration::from_secs(5)).await.unwrap();

    let stored = store.snapshot(None);
    assert_eq!(stored.len(), 1);
    let event = &stored[0].event;
    assert_eq!(event.endpoint, "/login");
    assert_eq!(event.request_headers[VERSION_HEADER], monitor.sdk_version());

    let request_body = serde_json::to_value(&event.request_body).unwrap();
    assert_eq!(request_body, json!({"user": "lin", "password": MASK}));
    let response_body = serde_json::to_value(&event.response_body).unwrap();
    assert_eq!(response_body, json!({"welcome": "lin", "token": MASK}));
}
