//! Axum producer adapter.
//!
//! [`capture`] times the downstream handler and enqueues one [`Event`] per
//! request. Request and response bodies are never buffered ahead of their
//! consumer: each is wrapped so every frame (and every stream error) passes
//! through untouched while a bounded copy is kept on the side. The event is
//! enqueued once the response body finishes, fails, or is dropped, which
//! keeps streaming responses such as SSE flowing to the client.
//!
//! A panicking handler is recorded as a 500 with `{"error": "<message>"}`
//! and the panic is then resumed unchanged, so the host's own panic handling
//! still applies.
//!
//! # Example
//!
//! ```no_run
//! use axum::{middleware, routing::get, Router};
//! use aiko_monitor::{middleware::capture, Config, Monitor};
//!
//! #[tokio::main]
//! async fn main() {
//!     let monitor = Monitor::new(Config::from_env().unwrap()).unwrap();
//!
//!     let app: Router = Router::new()
//!         .route("/", get(|| async { "hello" }))
//!         .layer(middleware::from_fn_with_state(monitor.clone(), capture));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```

use std::any::Any;
use std::net::SocketAddr;
use std::panic::{resume_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::body::{Body as HttpBody, Bytes};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use futures::FutureExt;
use http_body::{Body as _, Frame, SizeHint};
use tracing::debug;

use crate::client_ip::extract_client_ip;
use crate::codec::{canonical_headers, decode_response_body, parse_json_body};
use crate::monitor::Monitor;
use crate::types::{Body, Event, Headers};

/// Request header carrying the SDK version label.
pub const VERSION_HEADER: &str = "x-aiko-version";

/// Largest body copy kept per direction.
///
/// Larger bodies still reach the handler and the client in full; the event
/// records `{"truncated": true}` in their place.
pub const MAX_CAPTURED_BODY: usize = 1024 * 1024;

/// Fallback error text for 5xx responses without a canonical reason.
const DEFAULT_ERROR_TEXT: &str = "Internal Server Error";

/// Records every request passing through the layer.
///
/// Use with [`axum::middleware::from_fn_with_state`]. A disabled monitor
/// passes requests straight through. The peer address is taken from
/// [`ConnectInfo`] when the server was started with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
///
/// The request body is recorded as the handler reads it, so a handler that
/// never reads its body produces an event with an empty request body.
pub async fn capture(State(monitor): State<Monitor>, request: Request, next: Next) -> Response {
    if !monitor.is_enabled() {
        return next.run(request).await;
    }

    let started = Instant::now();
    let method = request.method().as_str().to_owned();
    let uri = request
        .uri()
        .path_and_query()
        .map_or_else(|| request.uri().path().to_owned(), |pq| pq.as_str().to_owned());
    let peer_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());

    let (parts, body) = request.into_parts();
    let mut request_headers = canonical_headers(&parts.headers);
    request_headers.insert(VERSION_HEADER.to_owned(), monitor.sdk_version().to_owned());
    let client_ip = extract_client_ip(&request_headers, peer_ip.as_deref());

    let request_copy = SharedCapture::default();
    let body = TeeBody::new(body, request_copy.clone(), None);
    let request = Request::from_parts(parts, HttpBody::new(body));

    let outcome = AssertUnwindSafe(next.run(request)).catch_unwind().await;
    let duration = started.elapsed();

    let base = Event::new(&method, uri, StatusCode::INTERNAL_SERVER_ERROR.as_u16())
        .with_request_headers(request_headers);
    let base = match client_ip {
        Some(ip) => base.with_client_ip(ip),
        None => base,
    };

    match outcome {
        Ok(response) => {
            let (parts, body) = response.into_parts();
            let pending = PendingEvent {
                monitor,
                base,
                request_copy,
                status: parts.status,
                response_headers: canonical_headers(&parts.headers),
                duration,
            };
            let body = TeeBody::new(body, SharedCapture::default(), Some(pending));
            Response::from_parts(parts, HttpBody::new(body))
        }
        Err(panic) => {
            let request_body = request_copy.lock().request_body();
            let event = base
                .with_request_body(request_body)
                .with_response_body(Body::single("error", panic_message(panic.as_ref())))
                .with_duration(duration);
            monitor.enqueue(event);

            resume_unwind(panic)
        }
    }
}

// ============================================================================
// Body capture
// ============================================================================

/// Bytes seen on one body, up to [`MAX_CAPTURED_BODY`].
#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

impl Captured {
    fn record(&mut self, chunk: &[u8]) {
        if self.truncated {
            return;
        }
        if self.bytes.len() + chunk.len() > MAX_CAPTURED_BODY {
            self.truncated = true;
            self.bytes = Vec::new();
        } else {
            self.bytes.extend_from_slice(chunk);
        }
    }

    fn request_body(&self) -> Body {
        if self.truncated {
            return truncated_body();
        }
        parse_json_body(&self.bytes)
    }

    fn response_body(&self, status: StatusCode, headers: &Headers) -> Body {
        if self.truncated {
            return truncated_body();
        }
        response_body_for(status, &self.bytes, headers)
    }
}

/// Copy shared between a [`TeeBody`] and whoever builds the event.
#[derive(Debug, Clone, Default)]
struct SharedCapture(Arc<Mutex<Captured>>);

impl SharedCapture {
    fn lock(&self) -> MutexGuard<'_, Captured> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Everything known about a request once the handler has returned.
struct PendingEvent {
    monitor: Monitor,
    base: Event,
    request_copy: SharedCapture,
    status: StatusCode,
    response_headers: Headers,
    duration: Duration,
}

impl PendingEvent {
    fn complete(self, response: &Captured) {
        let request_body = self.request_copy.lock().request_body();
        let response_body = response.response_body(self.status, &self.response_headers);

        let mut event = self
            .base
            .with_request_body(request_body)
            .with_response_headers(self.response_headers)
            .with_response_body(response_body)
            .with_duration(self.duration);
        event.status_code = self.status.as_u16();
        self.monitor.enqueue(event);
    }
}

/// Forwards every frame of `inner` and records data frames into `copy`.
///
/// When a pending event is attached it is completed exactly once: at end of
/// stream, on the first stream error, or when the body is dropped unread.
struct TeeBody {
    inner: HttpBody,
    copy: SharedCapture,
    pending: Option<PendingEvent>,
}

impl TeeBody {
    fn new(inner: HttpBody, copy: SharedCapture, pending: Option<PendingEvent>) -> Self {
        Self {
            inner,
            copy,
            pending,
        }
    }

    fn finish(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.complete(&self.copy.lock());
        }
    }
}

impl http_body::Body for TeeBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);

        match &polled {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.copy.lock().record(data);
                }
            }
            Poll::Ready(Some(Err(e))) => {
                debug!(error = %e, "Captured body stream failed");
                this.finish();
            }
            Poll::Ready(None) => this.finish(),
            Poll::Pending => {}
        }

        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for TeeBody {
    fn drop(&mut self) {
        self.finish();
    }
}

fn truncated_body() -> Body {
    Body::single("truncated", true)
}

/// Decodes the captured response, synthesizing an error body for empty 5xx.
fn response_body_for(status: StatusCode, raw: &[u8], headers: &Headers) -> Body {
    if raw.is_empty() && status.is_server_error() {
        let reason = status.canonical_reason().unwrap_or(DEFAULT_ERROR_TEXT);
        return Body::single("error", reason);
    }
    decode_response_body(raw, headers)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_server_error_gets_reason_body() {
        let body = response_body_for(StatusCode::SERVICE_UNAVAILABLE, b"", &Headers::new());
        assert_eq!(body.get("error").and_then(Body::as_str), Some("Service Unavailable"));
    }

    #[test]
    fn nonstandard_server_error_uses_default_text() {
        let status = StatusCode::from_u16(599).unwrap();
        let body = response_body_for(status, b"", &Headers::new());
        assert_eq!(body.get("error").and_then(Body::as_str), Some(DEFAULT_ERROR_TEXT));
    }

    #[test]
    fn empty_success_is_empty_object() {
        assert!(response_body_for(StatusCode::NO_CONTENT, b"", &Headers::new()).is_empty_object());
    }

    #[test]
    fn server_error_with_body_is_decoded() {
        let mut headers = Headers::new();
        headers.insert("content-type".into(), "text/plain".into());
        let body = response_body_for(StatusCode::BAD_GATEWAY, b"upstream down", &headers);
        assert_eq!(body, Body::from("upstream down"));
    }

    #[test]
    fn capture_keeps_bytes_up_to_the_limit() {
        let mut captured = Captured::default();
        captured.record(b"{\"a\":");
        captured.record(b"1}");
        assert!(!captured.truncated);
        assert_eq!(captured.request_body(), Body::from(serde_json::json!({"a": 1})));
    }

    #[test]
    fn capture_over_the_limit_is_marked_truncated() {
        let mut captured = Captured::default();
        captured.record(&vec![b'x'; MAX_CAPTURED_BODY]);
        assert!(!captured.truncated);

        captured.record(b"x");
        assert!(captured.truncated);
        assert!(captured.bytes.is_empty());

        // Later chunks are ignored once truncated.
        captured.record(b"y");
        assert!(captured.bytes.is_empty());
        assert_eq!(
            captured.response_body(StatusCode::OK, &Headers::new()),
            Body::single("truncated", true)
        );
    }

    #[test]
    fn panic_payloads_are_stringified() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");

        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(panic_message(boxed.as_ref()), "owned boom");

        let boxed: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(boxed.as_ref()), "panic");
    }
}
