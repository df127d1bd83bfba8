//! Server configuration module.
//!
//! Parses configuration from environment variables for the Aiko ingest server.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `AIKO_PROJECT_KEY` | Yes | - | Project key monitors must present |
//! | `AIKO_SECRET_KEY` | Yes | - | 43-character base64url signing secret |
//! | `PORT` | No | 8080 | HTTP server port |
//! | `AIKO_INGEST_CAPACITY` | No | 1000 | Number of received events retained |

use std::env;

use aiko_monitor::SecretKey;
use thiserror::Error;

/// Default HTTP server port.
const DEFAULT_PORT: u16 = 8080;

/// Default number of events kept in memory.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Errors that can occur when parsing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Environment variable has invalid format.
    #[error("invalid format for {var}: {message}")]
    InvalidFormat { var: String, message: String },

    /// Port number is invalid.
    #[error("invalid port number: {0}")]
    InvalidPort(#[from] std::num::ParseIntError),
}

/// Server configuration parsed from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Project key expected in `X-Project-Key`.
    pub project_key: String,

    /// Decoded signing secret.
    pub secret: SecretKey,

    /// HTTP server port.
    pub port: u16,

    /// Maximum number of events retained by the store.
    pub capacity: usize,
}

impl Config {
    /// Creates a configuration with the default port and capacity.
    pub fn new(project_key: impl Into<String>, secret: SecretKey) -> Self {
        Self {
            project_key: project_key.into(),
            secret,
            port: DEFAULT_PORT,
            capacity: DEFAULT_CAPACITY,
        }
    }

    /// Parse configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - `AIKO_PROJECT_KEY` or `AIKO_SECRET_KEY` is missing
    /// - The secret is not a valid 43-character base64url string
    /// - `PORT` is not a valid u16 or `AIKO_INGEST_CAPACITY` is not a positive integer
    ///
    /// # Example
    ///
    /// ```no_run
    /// use aiko_ingest::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("Server will listen on port {}", config.port);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        let project_key = required_var("AIKO_PROJECT_KEY")?;
        let secret_raw = required_var("AIKO_SECRET_KEY")?;
        let secret = SecretKey::decode(secret_raw.trim()).map_err(|e| ConfigError::InvalidFormat {
            var: "AIKO_SECRET_KEY".to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            project_key,
            secret,
            port: parse_port()?,
            capacity: parse_capacity()?,
        })
    }
}

/// Reads a variable that must be present and non-empty.
fn required_var(name: &str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(ConfigError::MissingEnvVar(name.to_string())),
    }
}

/// Parse the PORT environment variable.
///
/// Returns the default port if not set.
fn parse_port() -> Result<u16, ConfigError> {
    match env::var("PORT") {
        Ok(port_str) => Ok(port_str.parse()?),
        Err(env::VarError::NotPresent) => Ok(DEFAULT_PORT),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidFormat {
            var: "PORT".to_string(),
            message: "contains invalid unicode".to_string(),
        }),
    }
}

fn parse_capacity() -> Result<usize, ConfigError> {
    let raw = match env::var("AIKO_INGEST_CAPACITY") {
        Ok(raw) => raw,
        Err(_) => return Ok(DEFAULT_CAPACITY),
    };

    match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::InvalidFormat {
            var: "AIKO_INGEST_CAPACITY".to_string(),
            message: format!("expected a positive integer, got '{raw}'"),
        }),
    }
}
