//! Manifest proxying: fetch, rewrite, cache.
//!
//! The rewrite walks the playlist line by line and points every URI
//! (nested playlists, media segments, alternate renditions, encryption
//! keys) back at this proxy, resolving relative references against the
//! upstream playlist URL. The rewritten body is what gets cached, so a
//! cache hit is served verbatim.

use std::sync::LazyLock;
use std::time::Duration;

use axum::http::HeaderMap;
use bytes::Bytes;
use regex::Regex;
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::errors::ProxyResult;
use crate::services::{HostPolicy, PlaylistCache};

use super::{MANIFEST_ROUTE, SEGMENT_ROUTE, classify_upstream_status, upstream_headers};

/// Media type for rewritten playlists.
pub const HLS_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

static URI_ATTRIBUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"URI="([^"]*)""#).expect("static pattern"));

/// Whether the response body came from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    /// Value of the `X-Cache` response header.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
        }
    }
}

/// One manifest request, fully vetted by the dispatcher.
pub struct ManifestRequest {
    /// Canonical upstream playlist URL.
    pub url: Url,
    /// Caller header overrides, Referer already repaired.
    pub caller_headers: HeaderMap,
    /// Raw caller `headers` JSON, propagated into every rewritten URL so
    /// sub-requests carry the same upstream headers.
    pub headers_param: Option<String>,
    /// Absolute base URL of this proxy for the current request.
    pub server_base: String,
}

pub struct RewrittenManifest {
    pub body: Bytes,
    pub cache: CacheStatus,
}

/// Serve a playlist through the cache, fetching and rewriting on a miss.
pub async fn serve_manifest(
    client: &Client,
    policy: &HostPolicy,
    cache: &PlaylistCache,
    timeout: Duration,
    default_user_agent: &str,
    request: &ManifestRequest,
) -> ProxyResult<RewrittenManifest> {
    let key = request.url.as_str();
    if let Some(body) = cache.get(key).await {
        return Ok(RewrittenManifest {
            body,
            cache: CacheStatus::Hit,
        });
    }

    let host = request.url.host_str().unwrap_or_default();
    let headers = upstream_headers(policy, host, &request.caller_headers, default_user_agent);

    let response = client
        .get(request.url.clone())
        .headers(headers)
        .timeout(timeout)
        .send()
        .await?;

    if let Some(error) = classify_upstream_status(response.status()) {
        return Err(error);
    }

    let body = response.text().await?;
    debug!(url = %request.url, bytes = body.len(), "rewriting upstream playlist");

    let rewritten = rewrite_manifest(
        &body,
        &request.url,
        &request.server_base,
        request.headers_param.as_deref(),
    );

    let body = Bytes::from(rewritten);
    cache.insert(key, body.clone()).await;

    Ok(RewrittenManifest {
        body,
        cache: CacheStatus::Miss,
    })
}

/// Rewrite every URI in a playlist to point back at this proxy.
///
/// Line rules:
/// - empty lines and comments without a `URI="…"` attribute pass through;
/// - `#EXT-X-MEDIA` URIs route to the manifest path, `#EXT-X-KEY` URIs to
///   the byte-streaming path;
/// - bare URI lines resolve against the playlist URL and route by the
///   `m3u8` heuristic;
/// - lines whose URL fails to resolve are kept verbatim.
pub fn rewrite_manifest(
    body: &str,
    base: &Url,
    server_base: &str,
    headers_param: Option<&str>,
) -> String {
    let mut lines = Vec::new();

    for line in body.split('\n') {
        let trimmed = line.trim();

        if trimmed.is_empty() {
            lines.push(line.to_string());
            continue;
        }

        if trimmed.starts_with('#') {
            if trimmed.starts_with("#EXT-X-MEDIA:") && trimmed.contains("URI=") {
                lines.push(rewrite_uri_attribute(
                    trimmed,
                    base,
                    server_base,
                    MANIFEST_ROUTE,
                    headers_param,
                ));
            } else if trimmed.starts_with("#EXT-X-KEY:") && trimmed.contains("URI=") {
                lines.push(rewrite_uri_attribute(
                    trimmed,
                    base,
                    server_base,
                    SEGMENT_ROUTE,
                    headers_param,
                ));
            } else {
                lines.push(line.to_string());
            }
            continue;
        }

        match base.join(trimmed) {
            Ok(absolute) => {
                let route = if absolute.path().contains("m3u8") || trimmed.contains("m3u8") {
                    MANIFEST_ROUTE
                } else {
                    SEGMENT_ROUTE
                };
                lines.push(proxied_url(server_base, route, &absolute, headers_param));
            }
            // Unresolvable reference: leave it for the player to judge.
            Err(_) => lines.push(line.to_string()),
        }
    }

    lines.join("\n")
}

fn rewrite_uri_attribute(
    line: &str,
    base: &Url,
    server_base: &str,
    route: &str,
    headers_param: Option<&str>,
) -> String {
    URI_ATTRIBUTE
        .replace(line, |caps: &regex::Captures| match base.join(&caps[1]) {
            Ok(absolute) => format!(
                r#"URI="{}""#,
                proxied_url(server_base, route, &absolute, headers_param)
            ),
            Err(_) => caps[0].to_string(),
        })
        .into_owned()
}

/// `{server_base}/{route}?url={encoded}[&headers={encoded}]`
pub(crate) fn proxied_url(
    server_base: &str,
    route: &str,
    upstream: &Url,
    headers_param: Option<&str>,
) -> String {
    let mut rewritten = format!(
        "{server_base}/{route}?url={}",
        urlencoding::encode(upstream.as_str())
    );
    if let Some(headers) = headers_param {
        rewritten.push_str("&headers=");
        rewritten.push_str(&urlencoding::encode(headers));
    }
    rewritten
}
