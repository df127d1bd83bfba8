//! Redaction of sensitive data before an event leaves the process.
//!
//! Two independent mechanisms are applied:
//!
//! - **Key masking**: object entries and headers whose key is in
//!   [`SENSITIVE_KEYS`] (case-insensitive) have their whole value replaced by
//!   [`MASK`].
//! - **Pattern masking**: email addresses, IPv4 dotted quads and IPv6-like
//!   colon-hex groups inside any remaining string are replaced by [`MASK`],
//!   leaving the surrounding text intact.
//!
//! Binary data is never scanned; it is only tagged as `{"base64": ...}`.
//!
//! # Example
//!
//! ```
//! use aiko_monitor::redact::{redact_string, MASK};
//!
//! let masked = redact_string("contact ops@example.com from 10.0.0.7");
//! assert_eq!(masked, format!("contact {MASK} from {MASK}"));
//! ```

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::{Body, Event, Headers};

/// Replacement for every redacted value or match.
pub const MASK: &str = "[REDACTED]";

/// Keys whose values are always masked, compared in lower case.
pub const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "secret",
    "token",
    "api_key",
    "authorization",
    "cookie",
    "email",
    "phonenumber",
    "ssn",
    "creditcard",
    "set-cookie",
    "ip",
    "x-forwarded-for",
    "x-forwarded-ip",
    "x-real-ip",
    "cf-connecting-ip",
    "true-client-ip",
    "forwarded",
    "remote-addr",
    "client-ip",
];

/// PII patterns, applied in order over the whole string.
///
/// Word, digit and boundary classes are ASCII-only (`-u`).
const PII_PATTERNS: &[&str] = &[
    // Email addresses
    r"(?-u:[\w.-]+@[\w.-]+\.[A-Za-z]{2,})",
    // IPv4 dotted quads
    r"(?-u:\b(?:\d{1,3}\.){3}\d{1,3}\b)",
    // IPv6-like colon-separated hex groups
    r"(?i-u:\b(?:[A-F0-9]{1,4}:){2,7}[A-F0-9]{1,4}\b)",
];

static DEFAULT_REDACTOR: Lazy<Redactor> = Lazy::new(Redactor::new);

/// Compiled redaction rules.
///
/// Construction compiles the PII patterns once; a `Redactor` is cheap to
/// share behind an `Arc` or use through the module-level functions, which
/// delegate to a process-wide default instance.
#[derive(Debug, Clone)]
pub struct Redactor {
    patterns: Vec<Regex>,
}

impl Redactor {
    /// Creates a redactor with the built-in PII patterns.
    #[must_use]
    pub fn new() -> Self {
        let patterns = PII_PATTERNS
            .iter()
            .map(|p| Regex::new(p).expect("built-in PII pattern must compile"))
            .collect();
        Self { patterns }
    }

    /// Returns true when `key` names a field that is always masked.
    #[must_use]
    pub fn is_sensitive_key(key: &str) -> bool {
        let lower = key.to_ascii_lowercase();
        SENSITIVE_KEYS.contains(&lower.as_str())
    }

    /// Masks email, IPv4 and IPv6-like tokens in `s`.
    #[must_use]
    pub fn redact_string(&self, s: &str) -> String {
        let mut masked = s.to_string();
        for pattern in &self.patterns {
            if pattern.is_match(&masked) {
                masked = pattern.replace_all(&masked, MASK).into_owned();
            }
        }
        masked
    }

    /// Recursively redacts a body tree.
    #[must_use]
    pub fn redact_value(&self, value: &Body) -> Body {
        match value {
            Body::Object(map) => Body::Object(
                map.iter()
                    .map(|(key, val)| {
                        let redacted = if Self::is_sensitive_key(key) {
                            Body::String(MASK.to_string())
                        } else {
                            self.redact_value(val)
                        };
                        (key.clone(), redacted)
                    })
                    .collect::<BTreeMap<_, _>>(),
            ),
            Body::Array(items) => Body::Array(items.iter().map(|v| self.redact_value(v)).collect()),
            Body::String(s) => Body::String(self.redact_string(s)),
            Body::Binary(bytes) => Body::base64_wrapped(bytes),
            Body::Null | Body::Bool(_) | Body::Number(_) => value.clone(),
        }
    }

    /// Redacts a flat header map.
    ///
    /// Sensitive keys are masked wholesale; every other value is pattern
    /// masked. Output keys are lower-cased.
    #[must_use]
    pub fn redact_headers(&self, headers: &Headers) -> Headers {
        headers
            .iter()
            .map(|(key, value)| {
                let lower = key.to_ascii_lowercase();
                let redacted = if SENSITIVE_KEYS.contains(&lower.as_str()) {
                    MASK.to_string()
                } else {
                    self.redact_string(value)
                };
                (lower, redacted)
            })
            .collect()
    }

    /// Derives the redacted copy of an event that is put on the wire.
    #[must_use]
    pub fn redact_event(&self, event: &Event) -> Event {
        Event {
            url: event.url.clone(),
            endpoint: event.endpoint.clone(),
            method: event.method.clone(),
            status_code: event.status_code,
            request_headers: self.redact_headers(&event.request_headers),
            request_body: self.redact_value(&event.request_body),
            response_headers: self.redact_headers(&event.response_headers),
            response_body: self.redact_value(&event.response_body),
            duration_ms: event.duration_ms,
            client_ip: event.client_ip.clone(),
        }
    }
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new()
    }
}

/// Masks PII patterns in a string using the default redactor.
#[must_use]
pub fn redact_string(s: &str) -> String {
    DEFAULT_REDACTOR.redact_string(s)
}

/// Recursively redacts a body using the default redactor.
#[must_use]
pub fn redact_value(value: &Body) -> Body {
    DEFAULT_REDACTOR.redact_value(value)
}

/// Redacts a header map using the default redactor.
#[must_use]
pub fn redact_headers(headers: &Headers) -> Headers {
    DEFAULT_REDACTOR.redact_headers(headers)
}

/// Redacts an event using the default redactor.
#[must_use]
pub fn redact_event(event: &Event) -> Event {
    DEFAULT_REDACTOR.redact_event(event)
}
