//! Client IP resolution for the `X-Client-IP` delivery header.
//!
//! Proxies and CDNs report the originating address in a handful of headers.
//! They are consulted in a fixed priority order, followed by the RFC 7239
//! `Forwarded` header and finally the socket peer address.

use std::net::{IpAddr, SocketAddr};

use crate::types::Headers;

/// Forwarding headers, highest priority first.
pub const PRIORITY_CLIENT_IP_HEADERS: &[&str] = &[
    "cf-connecting-ip",
    "x-vercel-forwarded-for",
    "x-sentry-forwarded-for",
    "x-forwarded-for",
    "x-real-ip",
    "x-cluster-client-ip",
    "fastly-client-ip",
];

/// Resolves the client IP from request headers and an optional peer address.
///
/// Returns `None` when no header or peer value holds a valid IP.
///
/// # Example
///
/// ```
/// use aiko_monitor::client_ip::extract_client_ip;
/// use aiko_monitor::types::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("x-forwarded-for".into(), "198.51.100.1, 10.0.0.1".into());
/// assert_eq!(extract_client_ip(&headers, None).as_deref(), Some("198.51.100.1"));
/// ```
#[must_use]
pub fn extract_client_ip(headers: &Headers, peer_ip: Option<&str>) -> Option<String> {
    let lookup = |name: &str| {
        headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    };

    for name in PRIORITY_CLIENT_IP_HEADERS {
        if let Some(ip) = lookup(name).and_then(first_ip_from_list) {
            return Some(ip);
        }
    }

    if let Some(ip) = lookup("forwarded").and_then(parse_forwarded_header) {
        return Some(ip);
    }

    peer_ip.and_then(parse_ip)
}

/// Extracts the host part of a `host:port` socket address string.
#[must_use]
pub fn peer_ip_from_remote_addr(addr: &str) -> Option<String> {
    if addr.is_empty() {
        return None;
    }
    match addr.parse::<SocketAddr>() {
        Ok(socket) => Some(socket.ip().to_string()),
        Err(_) => Some(normalize_ip(addr).to_string()),
    }
}

fn first_ip_from_list(value: &str) -> Option<String> {
    value
        .split(',')
        .map(|part| part.trim().trim_matches('"'))
        .find_map(parse_ip)
}

fn parse_forwarded_header(value: &str) -> Option<String> {
    value
        .split(';')
        .flat_map(|segment| segment.split(','))
        .filter(|item| item.to_ascii_lowercase().contains("for="))
        .filter_map(|item| item.split_once('=').map(|(_, candidate)| candidate))
        .map(|candidate| candidate.trim().trim_matches('"'))
        .find_map(parse_ip)
}

/// Parses an IP, tolerating surrounding whitespace and IPv6 brackets.
fn parse_ip(value: &str) -> Option<String> {
    let normalized = normalize_ip(value);
    if normalized.is_empty() {
        return None;
    }
    normalized
        .parse::<IpAddr>()
        .ok()
        .map(|_| normalized.to_string())
}

fn normalize_ip(value: &str) -> &str {
    let trimmed = value.trim();
    let trimmed = trimmed.strip_prefix('[').unwrap_or(trimmed);
    trimmed.strip_suffix(']').unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> Headers {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn cloudflare_header_wins() {
        let h = headers(&[
            ("cf-connecting-ip", "198.51.100.25"),
            ("x-forwarded-for", "198.51.100.1, 198.51.100.2"),
            ("forwarded", "for=203.0.113.200"),
        ]);
        assert_eq!(
            extract_client_ip(&h, Some("203.0.113.99")).as_deref(),
            Some("198.51.100.25")
        );
    }

    #[test]
    fn forwarded_for_takes_first_valid_entry() {
        let h = headers(&[("X-Forwarded-For", "unknown, \"198.51.100.50\", 203.0.113.8")]);
        assert_eq!(extract_client_ip(&h, None).as_deref(), Some("198.51.100.50"));
    }

    #[test]
    fn ipv6_is_preserved_verbatim() {
        let h = headers(&[("x-forwarded-for", "2001:0DB8:85A3:0000:0000:8A2E:0370:7334")]);
        assert_eq!(
            extract_client_ip(&h, None).as_deref(),
            Some("2001:0DB8:85A3:0000:0000:8A2E:0370:7334")
        );
    }

    #[test]
    fn rfc7239_forwarded_header() {
        let h = headers(&[("forwarded", "proto=https;for=\"[2001:db8::1]\";by=203.0.113.1")]);
        assert_eq!(extract_client_ip(&h, None).as_deref(), Some("2001:db8::1"));
    }

    #[test]
    fn falls_back_to_peer() {
        assert_eq!(
            extract_client_ip(&Headers::new(), Some("203.0.113.99")).as_deref(),
            Some("203.0.113.99")
        );
        assert_eq!(extract_client_ip(&Headers::new(), Some("not-an-ip")), None);
        assert_eq!(extract_client_ip(&Headers::new(), None), None);
    }

    #[test]
    fn peer_ip_strips_port() {
        assert_eq!(
            peer_ip_from_remote_addr("203.0.113.99:52345").as_deref(),
            Some("203.0.113.99")
        );
        assert_eq!(peer_ip_from_remote_addr("[::1]:8080").as_deref(), Some("::1"));
        assert_eq!(peer_ip_from_remote_addr("10.0.0.1").as_deref(), Some("10.0.0.1"));
        assert_eq!(peer_ip_from_remote_addr(""), None);
    }
}
