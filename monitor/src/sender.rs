//! HTTP sender for Aiko Monitor.
//!
//! Delivers one event per request to the ingestion endpoint:
//!
//! - Redaction before anything leaves the process
//! - Gzip-compressed JSON body signed with HMAC-SHA256
//! - Up to 3 attempts per event (250ms → 2s backoff, ×0.8–1.2 jitter)
//! - Retries only on 408, 429, 5xx and transient transport failures
//!
//! # Example
//!
//! ```no_run
//! use aiko_monitor::sender::{Sender, SenderConfig};
//! use aiko_monitor::signing::SecretKey;
//! use aiko_monitor::types::Event;
//!
//! #[tokio::main]
//! async fn main() {
//!     let secret = SecretKey::decode(&"B".repeat(43)).unwrap();
//!     let config = SenderConfig::new(
//!         "http://localhost:8080/api/monitor/ingest".to_string(),
//!         "pk_AAAAAAAAAAAAAAAAAAAAAA".to_string(),
//!         secret,
//!     );
//!     let sender = Sender::new(config, reqwest::Client::new());
//!
//!     let attempts = sender.deliver(&Event::new("GET", "/health", 200)).await.unwrap();
//!     println!("delivered after {attempts} attempt(s)");
//! }
//! ```

use std::error::Error as StdError;
use std::io;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::client_ip::extract_client_ip;
use crate::redact::redact_event;
use crate::signing::{gzip_event, sign, PackagingError, SecretKey};
use crate::types::Event;

/// Total attempts per event, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Delay before the first retry.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(250);

/// Upper bound for the doubled backoff.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(2);

/// Per-attempt request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Jitter multiplier range applied to each backoff.
const JITTER_MIN: f64 = 0.8;
const JITTER_MAX: f64 = 1.2;

const PROJECT_KEY_HEADER: &str = "x-project-key";
const SIGNATURE_HEADER: &str = "x-signature";
const CLIENT_IP_HEADER: &str = "x-client-ip";

/// Errors that end delivery of a single event.
#[derive(Error, Debug)]
pub enum SenderError {
    /// The endpoint answered with a non-retryable status.
    #[error("delivery rejected with status {status}")]
    Rejected { status: u16 },

    /// Every attempt failed with a retryable status or transport error.
    #[error("delivery failed after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    /// Non-retryable transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The event could not be serialized or compressed.
    #[error("packaging error: {0}")]
    Packaging(#[from] PackagingError),

    /// A header value contains characters HTTP does not allow.
    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
}

/// Retry schedule for a single event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Zero is treated as one.
    pub max_attempts: u32,

    pub initial_backoff: Duration,

    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Millisecond backoffs, for tests that exercise the retry path.
    #[must_use]
    pub fn fast_for_tests() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

/// Connection parameters for the sender.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Full ingestion URL, e.g. `https://main.aikocorp.ai/api/monitor/ingest`.
    pub endpoint: String,

    /// Public project identifier sent as `X-Project-Key`.
    pub project_key: String,

    pub secret: SecretKey,

    pub request_timeout: Duration,

    pub retry_policy: RetryPolicy,

    /// Seed for backoff jitter. `None` draws a fresh seed.
    pub jitter_seed: Option<u64>,
}

impl SenderConfig {
    #[must_use]
    pub fn new(endpoint: String, project_key: String, secret: SecretKey) -> Self {
        Self {
            endpoint,
            project_key,
            secret,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry_policy: RetryPolicy::default(),
            jitter_seed: None,
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_jitter_seed(mut self, seed: u64) -> Self {
        self.jitter_seed = Some(seed);
        self
    }
}

/// Signs and posts events to the ingestion endpoint.
///
/// A `Sender` is shared by all in-flight deliveries of one monitor; the only
/// mutable state is the jitter RNG.
pub struct Sender {
    config: SenderConfig,
    client: Client,
    rng: Mutex<StdRng>,
}

impl Sender {
    /// Creates a sender that issues requests through `client`.
    ///
    /// The per-attempt timeout from `config` is applied to each request, so a
    /// shared client without its own timeout is fine.
    #[must_use]
    pub fn new(config: SenderConfig, client: Client) -> Self {
        let seed = config.jitter_seed.unwrap_or_else(|| rand::rng().random());
        Self {
            config,
            client,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Redacts, packages and posts `event`, retrying transient failures.
    ///
    /// Returns the number of attempts it took.
    ///
    /// # Errors
    ///
    /// Returns `SenderError` when the event cannot be packaged, the endpoint
    /// rejects it, or all attempts fail. The caller is expected to log and
    /// drop the event.
    pub async fn deliver(&self, event: &Event) -> Result<u32, SenderError> {
        // Resolved before redaction masks the forwarding headers.
        let client_ip = event
            .client_ip
            .clone()
            .or_else(|| extract_client_ip(&event.request_headers, None));

        let redacted = redact_event(event);
        let body = gzip_event(&redacted)?;
        let signature = sign(self.config.secret.as_bytes(), &body);
        let headers = self.build_headers(&signature, client_ip.as_deref())?;

        let policy = self.config.retry_policy;
        let max_attempts = policy.max_attempts.max(1);
        let mut backoff = policy.initial_backoff;

        for attempt in 1..=max_attempts {
            debug!(attempt, endpoint = %event.endpoint, bytes = body.len(), "Delivering event");

            let result = self
                .client
                .post(&self.config.endpoint)
                .headers(headers.clone())
                .timeout(self.config.request_timeout)
                .body(body.clone())
                .send()
                .await;

            match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        debug!(attempt, status = status.as_u16(), "Event delivered");
                        return Ok(attempt);
                    }
                    if !is_retryable_status(status) {
                        warn!(status = status.as_u16(), "Event rejected by endpoint");
                        return Err(SenderError::Rejected {
                            status: status.as_u16(),
                        });
                    }
                    debug!(attempt, status = status.as_u16(), "Retryable status");
                }
                Err(e) => {
                    if !is_retryable_error(&e) {
                        warn!(error = %e, "Delivery failed");
                        return Err(SenderError::Http(e));
                    }
                    debug!(attempt, error = %e, "Retryable transport error");
                }
            }

            if attempt == max_attempts {
                break;
            }

            let delay = self.jittered(backoff);
            debug!(delay_ms = delay.as_millis() as u64, "Waiting before retry");
            sleep(delay).await;
            backoff = next_backoff(backoff, policy.max_backoff);
        }

        warn!(attempts = max_attempts, "Giving up on event");
        Err(SenderError::RetriesExhausted {
            attempts: max_attempts,
        })
    }

    fn build_headers(
        &self,
        signature: &str,
        client_ip: Option<&str>,
    ) -> Result<HeaderMap, SenderError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        headers.insert(
            HeaderName::from_static(PROJECT_KEY_HEADER),
            HeaderValue::from_str(&self.config.project_key)?,
        );
        headers.insert(
            HeaderName::from_static(SIGNATURE_HEADER),
            HeaderValue::from_str(signature)?,
        );

        if let Some(ip) = client_ip {
            match HeaderValue::from_str(ip) {
                Ok(value) => {
                    headers.insert(HeaderName::from_static(CLIENT_IP_HEADER), value);
                }
                Err(_) => debug!("Skipping client IP that is not a valid header value"),
            }
        }
        Ok(headers)
    }

    /// Scales `delay` by a random factor in `[0.8, 1.2]`.
    fn jittered(&self, delay: Duration) -> Duration {
        let factor = self
            .rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .random_range(JITTER_MIN..=JITTER_MAX);
        delay.mul_f64(factor)
    }
}

/// Doubles `current`, capped at `max`.
fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

/// True for 408, 429 and every 5xx status.
#[must_use]
pub fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

/// Classifies a transport failure as transient.
///
/// Walks the whole source chain. Timeouts, connection failures (including
/// DNS) and low-level refused/reset/aborted/unreachable socket errors are
/// retryable; request construction errors and anything unrecognised are not.
#[must_use]
pub fn is_retryable_error(err: &(dyn StdError + 'static)) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);

    while let Some(e) = current {
        if let Some(http) = e.downcast_ref::<reqwest::Error>() {
            if http.is_builder() {
                return false;
            }
            if http.is_timeout() || http.is_connect() {
                return true;
            }
        }

        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            if is_retryable_io_kind(io_err.kind()) {
                return true;
            }
        }

        if e.is::<tokio::time::error::Elapsed>() {
            return true;
        }

        current = e.source();
    }

    false
}

fn is_retryable_io_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::HostUnreachable
            | io::ErrorKind::NetworkUnreachable
            | io::ErrorKind::TimedOut
            | io::ErrorKind::Interrupted
            | io::ErrorKind::BrokenPipe
    )
}
