//! Header canonicalization and body decoding.
//!
//! Adapters use these helpers to turn a framework's native request/response
//! parts into the canonical [`Headers`] and [`Body`] shapes carried by an
//! [`crate::types::Event`]. None of these functions fail: anything that cannot
//! be decoded is kept in its rawest faithful form.

use std::borrow::Cow;
use std::io::Read;

use axum::http::HeaderMap;
use flate2::read::{DeflateDecoder, MultiGzDecoder, ZlibDecoder};

use crate::types::{Body, Headers};

/// Separator used when joining multiple values of one header.
pub const HEADER_VALUE_SEPARATOR: &str = ", ";

/// Flattens a multi-valued header collection into a lower-cased map.
///
/// Repeated values for one name are joined with `", "` in arrival order.
/// Values that are not valid UTF-8 are decoded lossily.
#[must_use]
pub fn canonical_headers(headers: &HeaderMap) -> Headers {
    let mut out = Headers::new();
    for name in headers.keys() {
        let values: Vec<Cow<'_, str>> = headers
            .get_all(name)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()))
            .collect();
        if values.is_empty() {
            continue;
        }
        out.insert(
            name.as_str().to_ascii_lowercase(),
            values.join(HEADER_VALUE_SEPARATOR),
        );
    }
    out
}

/// Normalizes an already flat header map.
///
/// Keys are lower-cased and empty keys are skipped. When two keys collide
/// after lower-casing, an empty value yields to the other one, identical values
/// are kept once, and distinct values are joined with `", "`. Applying this to
/// its own output returns the same map.
#[must_use]
pub fn canonical_header_map<I, K, V>(headers: I) -> Headers
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut normalized = Headers::new();
    for (key, value) in headers {
        let key = key.as_ref();
        let value = value.as_ref();
        if key.is_empty() {
            continue;
        }
        let lower = key.to_ascii_lowercase();
        match normalized.get_mut(&lower) {
            Some(existing) => {
                if existing.is_empty() {
                    *existing = value.to_string();
                } else if !value.is_empty() && value != existing.as_str() {
                    existing.push_str(HEADER_VALUE_SEPARATOR);
                    existing.push_str(value);
                }
            }
            None => {
                normalized.insert(lower, value.to_string());
            }
        }
    }
    normalized
}

/// Parses a request body as JSON on a best-effort basis.
///
/// Empty input yields `{}`, valid JSON yields its structure, anything else is
/// kept as a (lossily decoded) string.
#[must_use]
pub fn parse_json_body(raw: &[u8]) -> Body {
    if raw.is_empty() {
        return Body::empty();
    }
    match try_parse_json(raw) {
        Some(parsed) => parsed,
        None => Body::String(String::from_utf8_lossy(raw).into_owned()),
    }
}

/// Decodes a captured response body using its headers.
///
/// The payload is first decompressed according to `content-encoding`, then
/// interpreted according to `content-type`:
///
/// | content-type | result |
/// |---|---|
/// | contains `application/json` | JSON, else the decoded string |
/// | `text/*`, or contains `xml` / `html` | the decoded string |
/// | any other value | JSON, else `{"base64": ...}` |
/// | absent | JSON, else UTF-8 string, else `{"base64": ...}` |
#[must_use]
pub fn decode_response_body(raw: &[u8], headers: &Headers) -> Body {
    if raw.is_empty() {
        return Body::empty();
    }

    let encoding = header_value(headers, "content-encoding").unwrap_or_default();
    let decoded = decode_with_encoding(raw, &encoding);
    let ctype = header_value(headers, "content-type")
        .unwrap_or_default()
        .to_ascii_lowercase();

    if ctype.contains("application/json") {
        return try_parse_json(&decoded)
            .unwrap_or_else(|| Body::String(String::from_utf8_lossy(&decoded).into_owned()));
    }

    if ctype.starts_with("text/") || ctype.contains("xml") || ctype.contains("html") {
        return Body::String(String::from_utf8_lossy(&decoded).into_owned());
    }

    if !ctype.is_empty() {
        return try_parse_json(&decoded).unwrap_or_else(|| Body::base64_wrapped(&decoded));
    }

    if let Some(parsed) = try_parse_json(&decoded) {
        return parsed;
    }
    match std::str::from_utf8(&decoded) {
        Ok(text) => Body::String(text.to_string()),
        Err(_) => Body::base64_wrapped(&decoded),
    }
}

/// Decompresses `raw` according to a `content-encoding` value.
///
/// `gzip` is tried first; `deflate` tries zlib framing, then raw deflate.
/// On any failure the original bytes are returned unchanged.
#[must_use]
pub fn decode_with_encoding<'a>(raw: &'a [u8], encoding: &str) -> Cow<'a, [u8]> {
    let lower = encoding.to_ascii_lowercase();

    if lower.contains("gzip") {
        if let Some(data) = read_all(MultiGzDecoder::new(raw)) {
            return Cow::Owned(data);
        }
    }

    if lower.contains("deflate") {
        if let Some(data) = read_all(ZlibDecoder::new(raw)) {
            return Cow::Owned(data);
        }
        if let Some(data) = read_all(DeflateDecoder::new(raw)) {
            return Cow::Owned(data);
        }
    }

    Cow::Borrowed(raw)
}

fn read_all<R: Read>(mut reader: R) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    reader.read_to_end(&mut out).ok()?;
    Some(out)
}

fn try_parse_json(raw: &[u8]) -> Option<Body> {
    serde_json::from_slice::<serde_json::Value>(raw)
        .ok()
        .map(Body::from)
}

/// Case-insensitive header lookup on a flat map.
fn header_value(headers: &Headers, name: &str) -> Option<String> {
    if let Some(value) = headers.get(name) {
        return Some(value.clone());
    }
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.clone())
}
