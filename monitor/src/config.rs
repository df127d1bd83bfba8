//! Configuration for Aiko Monitor.
//!
//! A [`Config`] is built in code with [`Config::new`] and the `with_*`
//! setters, or read from the environment with [`Config::from_env`]. Defaults
//! are applied first and the result is validated once, when the monitor is
//! constructed.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `AIKO_PROJECT_KEY` | When enabled | - | Public project key (`pk_` + 22 base64url chars) |
//! | `AIKO_SECRET_KEY` | When enabled | - | 43-char base64url signing secret |
//! | `AIKO_ENDPOINT` | No | production | Ingestion URL |
//! | `AIKO_ENABLED` | No | `true` | `false` turns the monitor into a no-op |
//! | `AIKO_QUEUE_SIZE` | No | 5000 | Event queue capacity |
//! | `AIKO_MAX_CONCURRENT_SENDS` | No | 5 | Parallel deliveries |
//!
//! # Example
//!
//! ```no_run
//! use aiko_monitor::config::Config;
//!
//! let config = Config::from_env().expect("Failed to load configuration");
//! println!("Endpoint: {}", config.endpoint);
//! ```

use std::env;
use std::fmt;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::sender::{RetryPolicy, SenderConfig, DEFAULT_REQUEST_TIMEOUT};
use crate::signing::SecretKey;

/// Production ingestion endpoint, used when none is configured.
pub const PRODUCTION_ENDPOINT: &str = "https://main.aikocorp.ai/api/monitor/ingest";

/// Staging ingestion endpoint.
pub const STAGING_ENDPOINT: &str = "https://staging.aikocorp.ai/api/monitor/ingest";

/// Default event queue capacity.
pub const DEFAULT_QUEUE_SIZE: usize = 5000;

/// Default number of concurrent deliveries.
pub const DEFAULT_MAX_CONCURRENT_SENDS: usize = 5;

/// Version label sent in `x-aiko-version`.
pub const SDK_VERSION: &str = concat!("rust:", env!("CARGO_PKG_VERSION"));

static PROJECT_KEY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^pk_[A-Za-z0-9_-]{22}$").expect("valid project key pattern"));

static LOCAL_ENDPOINT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^http://(?:localhost|127\.0\.0\.1|\[::1\]):\d+/api/monitor/ingest$")
        .expect("valid local endpoint pattern")
});

/// Errors that can occur while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Environment variable has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("projectKey must start with 'pk_' followed by 22 base64url characters")]
    InvalidProjectKey,

    #[error("secretKey must be exactly 43 base64url characters")]
    InvalidSecretKey,

    #[error(
        "endpoint must match http://localhost:PORT/api/monitor/ingest or be \
         'https://main.aikocorp.ai/api/monitor/ingest' or \
         'https://staging.aikocorp.ai/api/monitor/ingest', got '{0}'"
    )]
    InvalidEndpoint(String),

    /// The default HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Monitor configuration.
///
/// Zero values for `queue_size`, `max_concurrent_sends` and `http_timeout`
/// mean "use the default". A disabled configuration is never validated.
#[derive(Clone)]
pub struct Config {
    /// Public project identifier.
    pub project_key: String,

    /// Base64url signing secret. Never logged.
    pub secret_key: String,

    /// Ingestion URL.
    pub endpoint: String,

    pub enabled: bool,

    pub queue_size: usize,

    pub max_concurrent_sends: usize,

    /// Per-attempt timeout for deliveries.
    pub http_timeout: Duration,

    /// Client to deliver through. A new one is built when `None`.
    pub http_client: Option<Client>,

    pub retry_policy: RetryPolicy,

    /// Value of the `x-aiko-version` header added by adapters.
    pub sdk_version: String,

    /// Fixed seed for backoff jitter.
    pub jitter_seed: Option<u64>,
}

impl Config {
    /// Creates an enabled configuration targeting the production endpoint.
    #[must_use]
    pub fn new(project_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            project_key: project_key.into(),
            secret_key: secret_key.into(),
            endpoint: PRODUCTION_ENDPOINT.to_string(),
            enabled: true,
            queue_size: DEFAULT_QUEUE_SIZE,
            max_concurrent_sends: DEFAULT_MAX_CONCURRENT_SENDS,
            http_timeout: DEFAULT_REQUEST_TIMEOUT,
            http_client: None,
            retry_policy: RetryPolicy::default(),
            sdk_version: SDK_VERSION.to_string(),
            jitter_seed: None,
        }
    }

    /// A configuration that produces a no-op monitor.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new("", "").with_enabled(false)
    }

    /// Creates a `Config` by parsing environment variables.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if:
    /// - `AIKO_PROJECT_KEY` or `AIKO_SECRET_KEY` is missing while enabled
    /// - `AIKO_ENABLED` is not a boolean
    /// - `AIKO_QUEUE_SIZE` or `AIKO_MAX_CONCURRENT_SENDS` is not a positive integer
    ///
    /// Key and endpoint formats are checked later, by [`Config::validate`].
    pub fn from_env() -> Result<Self, ConfigError> {
        let enabled = match env::var("AIKO_ENABLED") {
            Ok(val) => parse_bool("AIKO_ENABLED", &val)?,
            Err(_) => true,
        };

        let required = |key: &str| -> Result<String, ConfigError> {
            match env::var(key) {
                Ok(val) => Ok(val),
                Err(_) if !enabled => Ok(String::new()),
                Err(_) => Err(ConfigError::MissingEnvVar(key.to_string())),
            }
        };
        let project_key = required("AIKO_PROJECT_KEY")?;
        let secret_key = required("AIKO_SECRET_KEY")?;

        let mut config = Self::new(project_key, secret_key).with_enabled(enabled);

        if let Ok(endpoint) = env::var("AIKO_ENDPOINT") {
            config.endpoint = endpoint;
        }
        if let Ok(val) = env::var("AIKO_QUEUE_SIZE") {
            config.queue_size = parse_positive("AIKO_QUEUE_SIZE", &val)?;
        }
        if let Ok(val) = env::var("AIKO_MAX_CONCURRENT_SENDS") {
            config.max_concurrent_sends = parse_positive("AIKO_MAX_CONCURRENT_SENDS", &val)?;
        }

        Ok(config)
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size;
        self
    }

    #[must_use]
    pub fn with_max_concurrent_sends(mut self, max: usize) -> Self {
        self.max_concurrent_sends = max;
        self
    }

    #[must_use]
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http_client = Some(client);
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    #[must_use]
    pub fn with_sdk_version(mut self, version: impl Into<String>) -> Self {
        self.sdk_version = version.into();
        self
    }

    #[must_use]
    pub fn with_jitter_seed(mut self, seed: u64) -> Self {
        self.jitter_seed = Some(seed);
        self
    }

    /// Applies defaults, checks formats and decodes the secret.
    ///
    /// # Errors
    ///
    /// Returns the first failing rule: project key, secret key, endpoint, then
    /// queue size and concurrency above [`Semaphore::MAX_PERMITS`].
    pub fn validate(&self) -> Result<ValidatedConfig, ConfigError> {
        let endpoint = if self.endpoint.is_empty() {
            PRODUCTION_ENDPOINT.to_string()
        } else {
            self.endpoint.clone()
        };

        if !PROJECT_KEY_PATTERN.is_match(&self.project_key) {
            return Err(ConfigError::InvalidProjectKey);
        }
        let secret = SecretKey::decode(&self.secret_key)?;
        if !is_allowed_endpoint(&endpoint) {
            return Err(ConfigError::InvalidEndpoint(endpoint));
        }

        let queue_size = non_zero_or(self.queue_size, DEFAULT_QUEUE_SIZE);
        check_permit_count("queue_size", queue_size)?;
        let max_concurrent_sends =
            non_zero_or(self.max_concurrent_sends, DEFAULT_MAX_CONCURRENT_SENDS);
        check_permit_count("max_concurrent_sends", max_concurrent_sends)?;
        let request_timeout = if self.http_timeout.is_zero() {
            DEFAULT_REQUEST_TIMEOUT
        } else {
            self.http_timeout
        };

        let client = match &self.http_client {
            Some(client) => client.clone(),
            None => Client::builder().timeout(request_timeout).build()?,
        };

        let mut sender = SenderConfig::new(endpoint, self.project_key.clone(), secret)
            .with_request_timeout(request_timeout)
            .with_retry_policy(self.retry_policy);
        if let Some(seed) = self.jitter_seed {
            sender = sender.with_jitter_seed(seed);
        }

        Ok(ValidatedConfig {
            sender,
            client,
            queue_size,
            max_concurrent_sends,
            sdk_version: self.sdk_version.clone(),
        })
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("project_key", &self.project_key)
            .field("secret_key", &"[REDACTED]")
            .field("endpoint", &self.endpoint)
            .field("enabled", &self.enabled)
            .field("queue_size", &self.queue_size)
            .field("max_concurrent_sends", &self.max_concurrent_sends)
            .field("http_timeout", &self.http_timeout)
            .field("retry_policy", &self.retry_policy)
            .field("sdk_version", &self.sdk_version)
            .finish_non_exhaustive()
    }
}

/// Immutable result of [`Config::validate`], owned by the dispatcher.
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    pub sender: SenderConfig,
    pub client: Client,
    pub queue_size: usize,
    pub max_concurrent_sends: usize,
    pub sdk_version: String,
}

/// True for the production and staging URLs and loopback development URLs.
#[must_use]
pub fn is_allowed_endpoint(endpoint: &str) -> bool {
    endpoint == PRODUCTION_ENDPOINT
        || endpoint == STAGING_ENDPOINT
        || LOCAL_ENDPOINT_PATTERN.is_match(endpoint)
}

fn non_zero_or(value: usize, default: usize) -> usize {
    if value == 0 {
        default
    } else {
        value
    }
}

/// Queue capacity and send concurrency both back a Tokio semaphore.
fn check_permit_count(key: &str, value: usize) -> Result<(), ConfigError> {
    if value > Semaphore::MAX_PERMITS {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("must not exceed {}", Semaphore::MAX_PERMITS),
        });
    }
    Ok(())
}

fn parse_bool(key: &str, val: &str) -> Result<bool, ConfigError> {
    match val.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean, got '{val}'"),
        }),
    }
}

fn parse_positive(key: &str, val: &str) -> Result<usize, ConfigError> {
    let parsed = val
        .trim()
        .parse::<usize>()
        .map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected positive integer, got '{val}'"),
        })?;
    if parsed == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "value must be greater than 0".to_string(),
        });
    }
    Ok(parsed)
}
