//! Request-boundary helpers.
//!
//! Everything here deals with the messy edge between clients and the
//! proxy: identifying the caller behind forwarding proxies, repairing
//! headers browsers are not allowed to set themselves, converting
//! caller-supplied header JSON into a real header map, and working out
//! the absolute base URL rewritten manifests must point back at.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use url::Url;

use crate::errors::{ProxyError, ProxyResult};

/// Resolve the throttling identity of a request.
///
/// Order: first `X-Forwarded-For` entry, then `X-Real-IP`, then the peer
/// address, then the literal `unknown`.
pub fn client_identifier(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok())
        && let Some(first) = forwarded.split(',').next()
    {
        let first = first.trim();
        if !first.is_empty() {
            return first.to_string();
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }

    if let Some(peer) = peer {
        return peer.ip().to_string();
    }

    "unknown".to_string()
}

/// Parse a caller-supplied `headers` JSON object into a header map.
///
/// Keys become case-insensitive `HeaderName`s; headers the proxy owns
/// (host, connection, lengths) are silently dropped.
pub fn parse_header_overrides(raw: &str) -> ProxyResult<HeaderMap> {
    let entries: HashMap<String, String> = serde_json::from_str(raw)
        .map_err(|_| ProxyError::url_malformed("headers must be a JSON object of strings"))?;

    let mut headers = HeaderMap::new();
    for (name, value) in entries {
        let lower = name.to_ascii_lowercase();
        if matches!(
            lower.as_str(),
            "host" | "connection" | "content-length" | "transfer-encoding"
        ) {
            continue;
        }
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ProxyError::url_malformed(format!("invalid header name '{name}'")))?;
        let value = HeaderValue::from_str(&value)
            .map_err(|_| ProxyError::url_malformed(format!("invalid value for header '{name}'")))?;
        headers.insert(name, value);
    }

    Ok(headers)
}

/// Repair a Referer that is not an absolute URL.
///
/// A path-shaped Referer is prefixed with the Origin; a bare slug becomes
/// `{Origin}/{slug}`. Without an Origin to repair against, the Referer is
/// dropped rather than forwarded broken.
pub fn repair_referer(headers: &mut HeaderMap) {
    let Some(referer) = headers
        .get(header::REFERER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
    else {
        return;
    };

    if Url::parse(&referer).is_ok() {
        return;
    }

    let origin = headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(|o| o.trim_end_matches('/').to_owned());

    match origin {
        Some(origin) => {
            let repaired = if referer.starts_with('/') {
                format!("{origin}{referer}")
            } else {
                format!("{origin}/{referer}")
            };
            match HeaderValue::from_str(&repaired) {
                Ok(value) => {
                    headers.insert(header::REFERER, value);
                }
                Err(_) => {
                    headers.remove(header::REFERER);
                }
            }
        }
        None => {
            headers.remove(header::REFERER);
        }
    }
}

/// Scheme of the connection this process actually accepts. The listener
/// is plaintext HTTP; TLS termination happens at the hosting platform.
pub const CONNECTION_SCHEME: &str = "http";

/// Derive the absolute base URL of this proxy for the current request.
///
/// Rewritten manifests embed this, so it has to match whatever scheme and
/// authority the client actually reached us on: `.railway.app` hosts are
/// always https, localhost and private ranges are always http, otherwise
/// `X-Forwarded-Proto` wins, then the protocol the connection arrived on.
pub fn derive_base_url(headers: &HeaderMap, fallback_authority: &str) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(fallback_authority);

    let scheme = if host.ends_with(".railway.app") {
        "https"
    } else if is_private_host(host) {
        "http"
    } else {
        match headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .map(|proto| proto.split(',').next().unwrap_or(proto).trim())
        {
            Some("http") => "http",
            Some("https") => "https",
            // No usable forwarding hint: the connection protocol is
            // knowable here, so use it rather than assuming https.
            _ => CONNECTION_SCHEME,
        }
    };

    format!("{scheme}://{host}")
}

/// Whether a Host header value names a loopback/private destination.
fn is_private_host(host: &str) -> bool {
    let bare = host_without_port(host);
    if bare.eq_ignore_ascii_case("localhost") {
        return true;
    }
    match bare.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified()
        }
        Ok(IpAddr::V6(v6)) => v6.is_loopback() || v6.is_unspecified(),
        Err(_) => false,
    }
}

fn host_without_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        // Bracketed IPv6 literal, optionally with a port after the bracket.
        return match rest.split_once(']') {
            Some((addr, _)) => addr,
            None => rest,
        };
    }
    match host.rsplit_once(':') {
        Some((head, _)) if !head.is_empty() => head,
        _ => host,
    }
}
