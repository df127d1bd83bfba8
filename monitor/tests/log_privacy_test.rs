//! Tests for the monitor's diagnostics.
//!
//! Verifies that queue drops are reported and that neither the signing secret
//! nor un-redacted event data ever reach the log output, even at TRACE level.
//!
//! # Test Approach
//!
//! 1. Install a tracing Layer that records every event as text
//! 2. Drive the monitor through delivery, retry and overflow paths
//! 3. Assert on what was, and was not, logged

use std::sync::{Arc, Mutex};
use std::time::Duration;

use aiko_monitor::{Body, Config, Event, Headers, Monitor, RetryPolicy};
use serde_json::json;
use tracing::Subscriber;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PROJECT_KEY: &str = "pk_AAAAAAAAAAAAAAAAAAAAAA";
const SECRET_KEY: &str = "BBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB";
const INGEST_PATH: &str = "/api/monitor/ingest";

// ============================================================================
// Log Capture Infrastructure
// ============================================================================

/// A buffer for capturing log output during tests.
#[derive(Clone, Default)]
struct LogCapture {
    logs: Arc<Mutex<Vec<String>>>,
}

impl LogCapture {
    fn get_logs(&self) -> String {
        self.logs.lock().unwrap().join("\n")
    }
}

/// A tracing Layer that captures log events for inspection.
struct CaptureLayer {
    capture: LogCapture,
}

impl<S> Layer<S> for CaptureLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = StringVisitor::default();
        event.record(&mut visitor);

        let message = format!(
            "[{}] {}: {}",
            event.metadata().level(),
            event.metadata().target(),
            visitor.parts.join(" ")
        );
        self.capture.logs.lock().unwrap().push(message);
    }
}

/// A visitor that collects all event fields into a string.
#[derive(Default)]
struct StringVisitor {
    parts: Vec<String>,
}

impl tracing::field::Visit for StringVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.parts.push(format!("{}={:?}", field.name(), value));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.parts.push(format!("{}={}", field.name(), value));
    }
}

/// Runs an async test body with a TRACE-level capturing subscriber.
///
/// The subscriber is thread-local, which covers tasks spawned on the
/// current-thread test runtime.
async fn with_log_capture_async<F, Fut>(test_fn: F) -> String
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let capture = LogCapture::default();
    let layer = CaptureLayer {
        capture: capture.clone(),
    };
    let subscriber = tracing_subscriber::registry()
        .with(layer.with_filter(tracing_subscriber::filter::LevelFilter::TRACE));

    let _guard = tracing::subscriber::set_default(subscriber);
    test_fn().await;

    capture.get_logs()
}

async fn ingest_server(status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(INGEST_PATH))
        .respond_with(ResponseTemplate::new(status))
        .mount(&server)
        .await;
    server
}

fn config_for(server: &MockServer) -> Config {
    let endpoint = format!("http://127.0.0.1:{}{INGEST_PATH}", server.address().port());
    Config::new(PROJECT_KEY, SECRET_KEY)
        .with_endpoint(endpoint)
        .with_retry_policy(RetryPolicy::fast_for_tests())
}

fn sensitive_event() -> Event {
    let mut headers = Headers::new();
    headers.insert("authorization".to_string(), "Bearer sk_live_42".to_string());

    Event::new("POST", "/signup", 201)
        .with_request_headers(headers)
        .with_request_body(Body::from(json!({
            "password": "correct-horse",
            "contact": "grace@example.org"
        })))
}

/// Asserts that the given sensitive value does not appear in logs.
fn assert_sensitive_not_in_logs(logs: &str, value: &str, value_name: &str) {
    assert!(
        !logs.contains(value),
        "{value_name} found in logs!\nValue: {value}\nLogs:\n{logs}"
    );
}

// ============================================================================
// Test Cases
// ============================================================================

#[tokio::test]
async fn test_successful_delivery_logs_no_secrets() {
    let server = ingest_server(200).await;

    let logs = with_log_capture_async(|| async {
        let monitor = Monitor::new(config_for(&server)).unwrap();
        monitor.enqueue(sensitive_event());
        monitor.shutdown(Duration::from_secs(5)).await.unwrap();
    })
    .await;

    assert!(logs.contains("Monitor started"), "Logs:\n{logs}");
    assert!(logs.contains("Event delivered"), "Logs:\n{logs}");
    assert_sensitive_not_in_logs(&logs, SECRET_KEY, "secret key");
    assert_sensitive_not_in_logs(&logs, "correct-horse", "password");
    assert_sensitive_not_in_logs(&logs, "grace@example.org", "email");
    assert_sensitive_not_in_logs(&logs, "sk_live_42", "authorization header");
}

#[tokio::test]
async fn test_failed_delivery_is_logged_without_payload() {
    let server = ingest_server(503).await;

    let logs = with_log_capture_async(|| async {
        let monitor = Monitor::new(config_for(&server)).unwrap();
        monitor.enqueue(sensitive_event());
        monitor.shutdown(Duration::from_secs(5)).await.unwrap();
        assert_eq!(monitor.stats().failed, 1);
    })
    .await;

    assert!(logs.contains("Giving up on event"), "Logs:\n{logs}");
    assert!(logs.contains("[WARN]"), "Logs:\n{logs}");
    assert_sensitive_not_in_logs(&logs, "correct-horse", "password");
    assert_sensitive_not_in_logs(&logs, SECRET_KEY, "secret key");
}

#[tokio::test]
async fn test_queue_overflow_is_reported() {
    let server = ingest_server(200).await;

    let logs = with_log_capture_async(|| async {
        let monitor = Monitor::new(config_for(&server).with_queue_size(1)).unwrap();
        monitor.enqueue(sensitive_event());
        monitor.enqueue(sensitive_event());
        monitor.shutdown(Duration::from_secs(5)).await.unwrap();
        assert_eq!(monitor.stats().dropped, 1);
    })
    .await;

    assert!(
        logs.contains("Event queue is full, dropping event"),
        "Logs:\n{logs}"
    );
    assert!(logs.contains("capacity=1"), "Logs:\n{logs}");
}

#[tokio::test]
async fn test_refused_connection_uses_every_attempt() {
    let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = closed.local_addr().unwrap().port();
    drop(closed);

    let logs = with_log_capture_async(|| async {
        let config = Config::new(PROJECT_KEY, SECRET_KEY)
            .with_endpoint(format!("http://127.0.0.1:{port}{INGEST_PATH}"))
            .with_retry_policy(RetryPolicy::fast_for_tests());
        let monitor = Monitor::new(config).unwrap();
        monitor.enqueue(sensitive_event());
        monitor.shutdown(Duration::from_secs(10)).await.unwrap();
        assert_eq!(monitor.stats().failed, 1);
    })
    .await;

    assert_eq!(logs.matches("Delivering event").count(), 3, "Logs:\n{logs}");
    assert_eq!(
        logs.matches("Retryable transport error").count(),
        3,
        "Logs:\n{logs}"
    );
    assert!(!logs.contains("Delivery failed"), "Logs:\n{logs}");
    assert!(logs.contains("Giving up on event"), "Logs:\n{logs}");
}
