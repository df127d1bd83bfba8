//! Event types shared by the capture pipeline and the ingest server.
//!
//! The JSON field names of [`Event`] are part of the wire protocol and must not
//! change: `url`, `endpoint`, `method`, `status_code`, `request_headers`,
//! `request_body`, `response_headers`, `response_body`, `duration_ms`.

use std::collections::BTreeMap;
use std::time::Duration;

use base64::prelude::*;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::codec::canonical_header_map;
use crate::endpoint::endpoint_from_url;

/// Flat, single-valued header map. Keys are always lower-cased.
pub type Headers = BTreeMap<String, String>;

/// Key used when raw bytes are represented as a JSON object.
pub const BASE64_KEY: &str = "base64";

/// A request or response body.
///
/// Mirrors the JSON data model with one extra variant, [`Body::Binary`], for
/// raw bytes supplied by an adapter. Binary bodies serialize as
/// `{"base64": "..."}` and are never scanned for PII.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<Body>),
    Object(BTreeMap<String, Body>),
    Binary(Vec<u8>),
}

impl Body {
    /// The normalized representation of an absent or empty body: `{}`.
    #[must_use]
    pub fn empty() -> Self {
        Self::Object(BTreeMap::new())
    }

    /// Wraps raw bytes as `{"base64": "<standard base64>"}`.
    #[must_use]
    pub fn base64_wrapped(bytes: &[u8]) -> Self {
        let mut map = BTreeMap::new();
        map.insert(
            BASE64_KEY.to_string(),
            Self::String(BASE64_STANDARD.encode(bytes)),
        );
        Self::Object(map)
    }

    /// Builds a single-entry object, e.g. `{"error": "boom"}`.
    #[must_use]
    pub fn single(key: impl Into<String>, value: impl Into<Body>) -> Self {
        let mut map = BTreeMap::new();
        map.insert(key.into(), value.into());
        Self::Object(map)
    }

    /// Returns true for `{}`.
    #[must_use]
    pub fn is_empty_object(&self) -> bool {
        matches!(self, Self::Object(map) if map.is_empty())
    }

    /// Looks up a key when this body is an object.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Body> {
        match self {
            Self::Object(map) => map.get(key),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<serde_json::Value> for Body {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Number(n),
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Body {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Body {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for Body {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Vec<u8>> for Body {
    fn from(value: Vec<u8>) -> Self {
        Self::Binary(value)
    }
}

impl Serialize for Body {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Number(n) => n.serialize(serializer),
            Self::String(s) => serializer.serialize_str(s),
            Self::Array(items) => items.serialize(serializer),
            Self::Object(map) => map.serialize(serializer),
            Self::Binary(bytes) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(BASE64_KEY, &BASE64_STANDARD.encode(bytes))?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Body {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Self::from)
    }
}

/// One observed request/response cycle.
///
/// Built once by a producer adapter, handed to [`crate::monitor::Monitor::enqueue`],
/// and never mutated afterwards; redaction derives a new copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Raw request URL or request-URI as seen by the server.
    pub url: String,

    /// Resolved path without query string (see [`endpoint_from_url`]).
    pub endpoint: String,

    /// Upper-case HTTP method.
    pub method: String,

    pub status_code: u16,

    #[serde(default)]
    pub request_headers: Headers,

    #[serde(default)]
    pub request_body: Body,

    #[serde(default)]
    pub response_headers: Headers,

    #[serde(default)]
    pub response_body: Body,

    pub duration_ms: u64,

    /// Client address resolved by the adapter. Sent as `X-Client-IP`, never
    /// serialized into the payload.
    #[serde(skip)]
    pub client_ip: Option<String>,
}

impl Event {
    /// Creates an event with empty headers and `{}` bodies.
    ///
    /// The endpoint is derived from `url` and the method is upper-cased.
    ///
    /// # Example
    ///
    /// ```
    /// use aiko_monitor::types::Event;
    ///
    /// let event = Event::new("get", "https://api.example.com/v1/items?page=2", 200);
    /// assert_eq!(event.method, "GET");
    /// assert_eq!(event.endpoint, "/v1/items");
    /// assert!(event.request_body.is_empty_object());
    /// ```
    #[must_use]
    pub fn new(method: impl AsRef<str>, url: impl Into<String>, status_code: u16) -> Self {
        let url = url.into();
        Self {
            endpoint: endpoint_from_url(&url),
            url,
            method: method.as_ref().to_ascii_uppercase(),
            status_code,
            request_headers: Headers::new(),
            request_body: Body::empty(),
            response_headers: Headers::new(),
            response_body: Body::empty(),
            duration_ms: 0,
            client_ip: None,
        }
    }

    /// Sets request headers, lower-casing and merging keys.
    #[must_use]
    pub fn with_request_headers(mut self, headers: Headers) -> Self {
        self.request_headers = canonical_header_map(&headers);
        self
    }

    #[must_use]
    pub fn with_request_body(mut self, body: Body) -> Self {
        self.request_body = body;
        self
    }

    /// Sets response headers, lower-casing and merging keys.
    #[must_use]
    pub fn with_response_headers(mut self, headers: Headers) -> Self {
        self.response_headers = canonical_header_map(&headers);
        self
    }

    #[must_use]
    pub fn with_response_body(mut self, body: Body) -> Self {
        self.response_body = body;
        self
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn with_client_ip(mut self, client_ip: impl Into<String>) -> Self {
        self.client_ip = Some(client_ip.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_serializes_with_stable_field_names() {
        let event = Event::new("post", "/orders?id=1", 201).with_duration(Duration::from_millis(42));
        let value = serde_json::to_value(&event).unwrap();

        let keys: Vec<&str> = value.as_object().unwrap().keys().map(String::as_str).collect();
        for field in [
            "url",
            "endpoint",
            "method",
            "status_code",
            "request_headers",
            "request_body",
            "response_headers",
            "response_body",
            "duration_ms",
        ] {
            assert!(keys.contains(&field), "missing field {field}");
        }
        assert_eq!(keys.len(), 9, "client_ip must not be serialized");
        assert_eq!(value["request_body"], json!({}));
        assert_eq!(value["duration_ms"], json!(42));
        assert_eq!(value["endpoint"], json!("/orders"));
    }

    #[test]
    fn binary_body_serializes_as_base64_object() {
        let body = Body::Binary(vec![0xff, 0x00, 0x10]);
        assert_eq!(serde_json::to_value(&body).unwrap(), json!({"base64": "/wAQ"}));
    }

    #[test]
    fn body_round_trips_through_json_value() {
        let value = json!({"a": [1, 2.5, "x", null, true], "b": {"c": "d"}});
        let body = Body::from(value.clone());
        assert_eq!(serde_json::to_value(&body).unwrap(), value);
    }

    #[test]
    fn builder_canonicalizes_header_keys() {
        let mut headers = Headers::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        let event = Event::new("GET", "/", 200).with_response_headers(headers);
        assert_eq!(
            event.response_headers.get("content-type").map(String::as_str),
            Some("application/json")
        );
    }

    #[test]
    fn deserialize_defaults_missing_bodies_to_empty_object() {
        let event: Event = serde_json::from_value(json!({
            "url": "/x",
            "endpoint": "/x",
            "method": "GET",
            "status_code": 200,
            "duration_ms": 1
        }))
        .unwrap();
        assert!(event.request_body.is_empty_object());
        assert!(event.response_headers.is_empty());
    }
}
