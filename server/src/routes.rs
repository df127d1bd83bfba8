//! HTTP route handlers for the Aiko ingest server.
//!
//! This module provides the HTTP API endpoints:
//!
//! - `POST /api/monitor/ingest` - Receive signed, gzip-compressed events
//! - `GET /events` - List retained events
//! - `DELETE /events` - Clear retained events
//! - `GET /health` - Health check endpoint
//!
//! # Architecture
//!
//! All routes share application state through [`AppState`], which contains:
//! - Configuration (project key and signing secret)
//! - The bounded event store
//! - Server start time for uptime reporting
//!
//! # Example
//!
//! ```rust,no_run
//! use aiko_ingest::routes::{create_router, AppState};
//! use aiko_ingest::config::Config;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("failed to load config");
//!     let state = AppState::new(config);
//!     let app = create_router(state);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```

use std::io::Read;
use std::sync::Arc;

use aiko_monitor::Event;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::auth::{check_project_key, verify_signature};
use crate::config::Config;
use crate::error::IngestError;
use crate::store::{EventStore, StoredEvent};

// ============================================================================
// Constants
// ============================================================================

/// Path monitors deliver to.
pub const INGEST_PATH: &str = "/api/monitor/ingest";

/// Header name for the project key.
const HEADER_PROJECT_KEY: &str = "x-project-key";

/// Header name for the HMAC-SHA256 signature.
const HEADER_SIGNATURE: &str = "x-signature";

/// Header name for the forwarded client address.
const HEADER_CLIENT_IP: &str = "x-client-ip";

/// Maximum compressed body size for event ingestion (1 MB).
const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Maximum decompressed payload size (16 MB).
const MAX_DECOMPRESSED_SIZE: u64 = 16 * 1024 * 1024;

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for all route handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<Config>,

    /// Received events.
    pub store: EventStore,

    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Creates a new application state with a store sized from the config.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let store = EventStore::new(config.capacity);
        Self::with_store(config, store)
    }

    /// Creates application state around an existing store.
    ///
    /// Useful for tests that inspect the store directly.
    #[must_use]
    pub fn with_store(config: Config, store: EventStore) -> Self {
        Self {
            config: Arc::new(config),
            store,
            start_time: Instant::now(),
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &"<Config>")
            .field("store", &self.store)
            .field("start_time", &self.start_time)
            .finish()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Creates the application router with all routes configured.
///
/// The body limit applies to the ingest route only; oversized requests are
/// refused with `413 Payload Too Large` before authentication runs. Every
/// route is wrapped in a request trace span.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(INGEST_PATH, post(post_ingest))
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .route("/events", get(get_events).delete(delete_events))
        .route("/health", get(get_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Error Response Types
// ============================================================================

/// JSON error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorResponse {
    fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: None,
        }
    }

    fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let body = ErrorResponse::new(self.to_string()).with_code(self.code());
        (self.status_code(), Json(body)).into_response()
    }
}

// ============================================================================
// POST /api/monitor/ingest - Event Ingestion
// ============================================================================

/// POST /api/monitor/ingest - Receive one event from a monitor.
///
/// # Authentication
///
/// - `X-Project-Key` header: must equal the configured project key
/// - `X-Signature` header: hex HMAC-SHA256 of the raw request body
///
/// # Request Body
///
/// A gzip stream containing one JSON-encoded event.
///
/// # Responses
///
/// - `202 Accepted` - Event stored
/// - `400 Bad Request` - Body is not gzip or not an event
/// - `401 Unauthorized` - Missing or unknown project key
/// - `403 Forbidden` - Missing or invalid signature
/// - `413 Payload Too Large` - Body exceeds 1 MB
async fn post_ingest(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    match ingest(&state, &headers, &body) {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(err) => {
            match &err {
                IngestError::Auth(auth) => warn!(error = %auth, "Rejected ingest request"),
                other => debug!(error = %other, "Failed to decode ingest payload"),
            }
            err.into_response()
        }
    }
}

fn ingest(state: &AppState, headers: &HeaderMap, body: &[u8]) -> Result<(), IngestError> {
    check_project_key(header_str(headers, HEADER_PROJECT_KEY), &state.config.project_key)?;
    verify_signature(header_str(headers, HEADER_SIGNATURE), body, &state.config.secret)?;

    let event = decode_payload(body)?;
    let client_ip = header_str(headers, HEADER_CLIENT_IP).map(str::to_owned);

    info!(
        method = %event.method,
        endpoint = %event.endpoint,
        status = event.status_code,
        duration_ms = event.duration_ms,
        "Event accepted"
    );
    state.store.push(event, client_ip);
    Ok(())
}

/// Gunzips and parses a delivery body.
fn decode_payload(body: &[u8]) -> Result<Event, IngestError> {
    let mut json = Vec::new();
    GzDecoder::new(body)
        .take(MAX_DECOMPRESSED_SIZE)
        .read_to_end(&mut json)
        .map_err(IngestError::Decompress)?;
    Ok(serde_json::from_slice(&json)?)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

// ============================================================================
// GET /events, DELETE /events - Inspection
// ============================================================================

/// Query parameters for listing events.
#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Return only the newest `limit` events.
    pub limit: Option<usize>,
}

/// Response body for `GET /events`.
#[derive(Debug, Serialize, Deserialize)]
pub struct EventsResponse {
    /// Events accepted since startup, including evicted ones.
    pub total_received: u64,

    /// Retained events, oldest first.
    pub events: Vec<StoredEvent>,
}

/// GET /events - List retained events, oldest first.
async fn get_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Json<EventsResponse> {
    Json(EventsResponse {
        total_received: state.store.total_received(),
        events: state.store.snapshot(query.limit),
    })
}

/// DELETE /events - Drop every retained event.
async fn delete_events(State(state): State<AppState>) -> StatusCode {
    let removed = state.store.clear();
    info!(removed, "Event store cleared");
    StatusCode::NO_CONTENT
}

// ============================================================================
// GET /health - Health Check
// ============================================================================

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Server status.
    pub status: String,

    /// Number of retained events.
    pub events: usize,

    /// Server uptime in seconds.
    pub uptime_seconds: u64,
}

/// GET /health - Health check endpoint.
///
/// No authentication required.
///
/// ```json
/// {
///   "status": "ok",
///   "events": 12,
///   "uptime_seconds": 3600
/// }
/// ```
async fn get_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        events: state.store.len(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

// ============================================================================
// Tests
// ============================================================================
