//! Resolution of the endpoint path recorded on each event.

use std::borrow::Cow;

use reqwest::Url;

/// Extracts the path of a raw URL or request-URI, without query string.
///
/// - Absolute URLs (`scheme://...`) and scheme-relative URLs (`//host/...`)
///   are parsed and their percent-encoded path is used.
/// - Strings starting with `/` are used as-is.
/// - Anything else is treated as a relative path.
///
/// The query string is always stripped and the result is prefixed with `/`.
/// An empty string means the endpoint could not be resolved.
///
/// # Example
///
/// ```
/// use aiko_monitor::endpoint::endpoint_from_url;
///
/// assert_eq!(endpoint_from_url("https://api.service.dev/v1/resources?id=7"), "/v1/resources");
/// assert_eq!(endpoint_from_url("/simple"), "/simple");
/// assert_eq!(endpoint_from_url(""), "");
/// ```
#[must_use]
pub fn endpoint_from_url(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }

    let path = if raw.contains("://") || raw.starts_with("//") {
        absolute_path(raw).unwrap_or_else(|| raw.to_string())
    } else if raw.starts_with('/') {
        raw.to_string()
    } else {
        strip_fragment(raw).to_string()
    };

    let path = strip_query(&path);
    if path.is_empty() {
        return String::new();
    }
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

/// Parses an absolute or scheme-relative URL and returns its escaped path.
///
/// Returns `None` when the string does not parse, so the caller can fall back
/// to the raw input. A URL with no path at all (`https://host`) resolves to an
/// empty path rather than the implicit `/`.
fn absolute_path(raw: &str) -> Option<String> {
    let candidate = if raw.starts_with("//") {
        Cow::Owned(format!("http:{raw}"))
    } else {
        Cow::Borrowed(raw)
    };
    let url = Url::parse(&candidate).ok()?;

    if url.path() == "/" && !has_explicit_path(raw) {
        return Some(String::new());
    }
    Some(url.path().to_string())
}

/// True when the authority section of `raw` is followed by a `/`.
fn has_explicit_path(raw: &str) -> bool {
    let after_scheme = match raw.find("//") {
        Some(idx) => &raw[idx + 2..],
        None => raw,
    };
    after_scheme
        .find(['/', '?', '#'])
        .is_some_and(|idx| after_scheme[idx..].starts_with('/'))
}

fn strip_query(raw: &str) -> &str {
    raw.split_once('?').map_or(raw, |(path, _)| path)
}

fn strip_fragment(raw: &str) -> &str {
    raw.split_once('#').map_or(raw, |(path, _)| path)
}
