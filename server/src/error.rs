//! Error types for the Aiko ingest server.
//!
//! # Error Types
//!
//! - [`ConfigError`](crate::config::ConfigError) - Configuration errors raised at startup
//! - [`IngestError`] - Reasons an ingest request is refused
//!
//! Each [`IngestError`] maps to exactly one HTTP status, which is what the
//! monitor's retry logic keys on: authentication failures are terminal,
//! payload errors are client errors.

use std::io;

use axum::http::StatusCode;
use thiserror::Error;

use crate::auth::AuthError;

/// Reasons an ingest request is refused.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Project key or signature check failed.
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// The body is not a valid gzip stream.
    #[error("invalid gzip payload: {0}")]
    Decompress(#[source] io::Error),

    /// The decompressed body is not an event.
    #[error("invalid event format: {0}")]
    Decode(#[from] serde_json::Error),
}

impl IngestError {
    /// HTTP status reported to the client.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Auth(err) if err.is_project_key_error() => StatusCode::UNAUTHORIZED,
            Self::Auth(_) => StatusCode::FORBIDDEN,
            Self::Decompress(_) | Self::Decode(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Machine-readable code used in error responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Auth(err) => err.code(),
            Self::Decompress(_) => "invalid_encoding",
            Self::Decode(_) => "invalid_format",
        }
    }
}
