//! Error types for Aiko Monitor.
//!
//! Only construction and shutdown can fail from a caller's point of view.
//! Enqueue-time drops and delivery failures are logged and counted but never
//! returned to the instrumented request path.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors surfaced by monitor operations.
///
/// # Examples
///
/// ```
/// use aiko_monitor::config::Config;
/// use aiko_monitor::error::MonitorError;
/// use aiko_monitor::Monitor;
///
/// let err = Monitor::new(Config::new("not-a-key", "short")).unwrap_err();
/// assert!(matches!(err, MonitorError::Config(_)));
/// ```
#[derive(Error, Debug)]
pub enum MonitorError {
    /// Configuration failed validation; no pipeline was started.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// An enabled monitor must be created inside a Tokio runtime.
    #[error("no Tokio runtime available to run the dispatch loop")]
    NoRuntime,

    #[error("shutdown error: {0}")]
    Shutdown(#[from] ShutdownError),
}

/// Errors returned by [`crate::Monitor::shutdown`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownError {
    /// The deadline passed before every queued event was delivered.
    ///
    /// Outstanding deliveries keep running in the background.
    #[error("shutdown deadline elapsed with {pending} event(s) still pending")]
    Timeout { pending: usize },
}

/// A specialized `Result` type for monitor operations.
pub type Result<T> = std::result::Result<T, MonitorError>;
