//! Client identifier resolution.

use axum::http::HeaderMap;
use std::net::SocketAddr;

/// Proxy header carrying the original client address first.
pub const FORWARDED_FOR: &str = "x-forwarded-for";
/// Proxy header carrying a single client address.
pub const REAL_IP: &str = "x-real-ip";

/// Identifier used when nothing identifies the client.
const UNKNOWN_CLIENT: &str = "unknown";

/// Resolve the identifier a request is rate limited under.
///
/// In priority order: the first entry of `X-Forwarded-For`, `X-Real-IP`,
/// then the IP of the connection. Values are used verbatim, so differently
/// formatted addresses are different clients.
pub fn client_identifier(headers: &HeaderMap, remote_addr: Option<SocketAddr>) -> String {
    if let Some(forwarded) = header_value(headers, FORWARDED_FOR) {
        let first = forwarded.split(',').next().unwrap_or(forwarded).trim();
        return first.to_string();
    }

    if let Some(real_ip) = header_value(headers, REAL_IP) {
        return real_ip.to_string();
    }

    remote_addr
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
}
