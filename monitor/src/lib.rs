//! Aiko Monitor - HTTP request/response capture and delivery.
//!
//! This crate records one event per HTTP request handled by a service,
//! strips sensitive data from it, and delivers it asynchronously to the Aiko
//! ingestion endpoint without slowing down or failing the request itself.
//!
//! # Overview
//!
//! A producer adapter (see [`middleware`]) builds an [`Event`] and hands it to
//! [`Monitor::enqueue`]. The monitor buffers events in a bounded queue that
//! drops on overflow, and a background loop delivers them with bounded
//! concurrency, signing each gzip-compressed payload with HMAC-SHA256 and
//! retrying transient failures with jittered backoff.
//!
//! # Privacy
//!
//! Redaction happens inside the pipeline, right before packaging. Sensitive
//! keys are masked at any depth and email/IP-like tokens are masked inside
//! strings. See [`redact`].
//!
//! # Modules
//!
//! - [`types`]: Event and body types
//! - [`codec`]: Header canonicalization and body decoding
//! - [`endpoint`]: Endpoint path resolution
//! - [`redact`]: Redaction of sensitive keys and PII patterns
//! - [`client_ip`]: Client IP resolution from forwarding headers
//! - [`signing`]: Gzip packaging and HMAC-SHA256 signatures
//! - [`sender`]: HTTP delivery with retry and backoff
//! - [`monitor`]: Bounded queue and dispatch loop
//! - [`config`]: Configuration and validation
//! - [`middleware`]: Axum capture layer
//! - [`error`]: Error types

pub mod client_ip;
pub mod codec;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod middleware;
pub mod monitor;
pub mod redact;
pub mod sender;
pub mod signing;
pub mod types;

pub use config::{Config, ConfigError};
pub use error::{MonitorError, Result, ShutdownError};
pub use monitor::{EnqueueOutcome, Monitor, MonitorStats};
pub use redact::{Redactor, MASK};
pub use sender::{RetryPolicy, Sender, SenderConfig, SenderError};
pub use signing::SecretKey;
pub use types::{Body, Event, Headers};
