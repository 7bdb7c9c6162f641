//! Provider-string resolution.
//!
//! Media providers hand back manifest locations in every shape
//! imaginable: plain URLs, `"A or B"` alternatives, pipe-joined lists,
//! JSON objects with half a dozen field spellings. This service reduces
//! any of them to one canonical, allowlisted manifest URL, confirming
//! candidates with a short HEAD probe where possible.

use std::sync::LazyLock;
use std::time::Duration;

use axum::http::{HeaderMap, header};
use regex::Regex;
use reqwest::Client;
use url::Url;

use crate::errors::{ProxyError, ProxyResult};
use crate::services::host_policy::HostPolicy;
use crate::utils::UrlSafety;

static ALTERNATIVE_SPLIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+or\s+").expect("static pattern"));
static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s"<>{}|]+"#).expect("static pattern"));

/// JSON fields searched, in order, when the input is an object.
const URL_FIELDS: &[&str] = &["url", "link", "src", "source", "stream", "m3u8", "playlist"];

pub struct UrlResolver {
    client: Client,
    probe_timeout: Duration,
}

impl UrlResolver {
    pub fn new(client: Client, probe_timeout: Duration) -> Self {
        Self {
            client,
            probe_timeout,
        }
    }

    /// Resolve a messy provider string to one canonical manifest URL.
    pub async fn resolve(
        &self,
        input: &str,
        caller_headers: &HeaderMap,
        policy: &HostPolicy,
    ) -> ProxyResult<Url> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ProxyError::url_malformed("empty resolve input"));
        }

        if ALTERNATIVE_SPLIT.is_match(trimmed) {
            let mut last_error =
                ProxyError::url_malformed("no alternative resolved to a playable URL");
            for part in ALTERNATIVE_SPLIT.split(trimmed) {
                match self.resolve_single(part, caller_headers, policy).await {
                    Ok(url) => return Ok(url),
                    Err(error) => last_error = error,
                }
            }
            return Err(last_error);
        }

        if trimmed.contains('|') {
            let mut last_error =
                ProxyError::url_malformed("no pipe-separated part resolved to a playable URL");
            for part in trimmed.split('|') {
                match self.resolve_single(part, caller_headers, policy).await {
                    Ok(url) => return Ok(url),
                    Err(error) => last_error = error,
                }
            }
            return Err(last_error);
        }

        self.resolve_single(trimmed, caller_headers, policy).await
    }

    async fn resolve_single(
        &self,
        input: &str,
        caller_headers: &HeaderMap,
        policy: &HostPolicy,
    ) -> ProxyResult<Url> {
        let input = input.trim();

        // A JSON object narrows the search to its best URL-bearing field.
        let candidate_text = match serde_json::from_str::<serde_json::Value>(input) {
            Ok(serde_json::Value::Object(object)) => URL_FIELDS
                .iter()
                .find_map(|field| {
                    object
                        .get(*field)
                        .and_then(|value| value.as_str())
                        .map(str::to_owned)
                })
                .unwrap_or_else(|| input.to_string()),
            _ => input.to_string(),
        };

        let matches: Vec<&str> = URL_PATTERN
            .find_iter(&candidate_text)
            .map(|m| m.as_str())
            .collect();
        if matches.is_empty() {
            return Err(ProxyError::url_malformed(describe_shape(input)));
        }

        let (manifest_candidates, other_candidates): (Vec<&str>, Vec<&str>) = matches
            .iter()
            .copied()
            .partition(|candidate| candidate.contains("m3u8"));

        let mut last_error: Option<ProxyError> = None;
        for candidate in manifest_candidates.iter().chain(other_candidates.iter()) {
            let url = match vet(candidate, policy) {
                Ok(url) => url,
                Err(error) => {
                    last_error = Some(error);
                    continue;
                }
            };

            match self.probe(&url, caller_headers).await {
                Some(content_type)
                    if content_type.contains("mpegurl") || content_type.contains("m3u8") =>
                {
                    return Ok(url);
                }
                Some(_) if url.as_str().contains(".m3u8") || candidate.contains(".m3u8") => {
                    return Ok(url);
                }
                None if candidate.contains("m3u8") || url.as_str().contains("m3u8") => {
                    // Unreachable for the probe but textually a manifest;
                    // playback will find out for real.
                    return Ok(url);
                }
                _ => {}
            }
        }

        // Nothing probed as a manifest. Without any m3u8-looking
        // candidate, hand back the first admissible URL and let playback
        // discover the content type.
        if manifest_candidates.is_empty() {
            for candidate in &matches {
                if let Ok(url) = vet(candidate, policy) {
                    return Ok(url);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ProxyError::url_malformed(describe_shape(input))))
    }

    async fn probe(&self, url: &Url, caller_headers: &HeaderMap) -> Option<String> {
        let response = self
            .client
            .head(url.clone())
            .headers(caller_headers.clone())
            .timeout(self.probe_timeout)
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|content_type| content_type.to_ascii_lowercase())
    }
}

fn vet(candidate: &str, policy: &HostPolicy) -> ProxyResult<Url> {
    UrlSafety::validate_safety(candidate)?;
    let url = UrlSafety::normalize(candidate)?;
    let host = url.host_str().unwrap_or_default();
    if !policy.is_allowed(host) {
        return Err(ProxyError::host_not_allowed(host));
    }
    Ok(url)
}

fn describe_shape(input: &str) -> String {
    if input.trim_start().starts_with('{') {
        "no URL in any known field of the JSON input".to_string()
    } else {
        "no URL found in the input".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyConfig;
    use axum::Router;
    use axum::routing::get;
    use tokio::net::TcpListener;

    fn allow_all() -> HostPolicy {
        HostPolicy::from_config(&PolicyConfig::default())
    }

    fn allow_only(hosts: &[&str]) -> HostPolicy {
        HostPolicy::from_config(&PolicyConfig {
            allowed_hosts: hosts.iter().map(|s| s.to_string()).collect(),
            host_headers: Default::default(),
        })
    }

    fn resolver() -> UrlResolver {
        UrlResolver::new(Client::new(), Duration::from_secs(5))
    }

    // Port 9 (discard) refuses instantly, exercising the probe-failure
    // branch without leaving the machine.
    const UNREACHABLE_MANIFEST: &str = "http://127.0.0.1:9/live/stream.m3u8";

    #[tokio::test]
    async fn textual_m3u8_survives_probe_failure() {
        let url = resolver()
            .resolve(UNREACHABLE_MANIFEST, &HeaderMap::new(), &allow_all())
            .await
            .unwrap();
        assert_eq!(url.as_str(), UNREACHABLE_MANIFEST);
    }

    #[tokio::test]
    async fn or_alternatives_skip_disallowed_hosts() {
        let input = format!("https://blocked.example/a.m3u8 or {UNREACHABLE_MANIFEST}");
        let url = resolver()
            .resolve(&input, &HeaderMap::new(), &allow_only(&["127.0.0.1"]))
            .await
            .unwrap();
        assert_eq!(url.as_str(), UNREACHABLE_MANIFEST);
    }

    #[tokio::test]
    async fn pipe_separated_parts_are_tried_in_order() {
        let input = format!("not a url|{UNREACHABLE_MANIFEST}");
        let url = resolver()
            .resolve(&input, &HeaderMap::new(), &allow_all())
            .await
            .unwrap();
        assert_eq!(url.as_str(), UNREACHABLE_MANIFEST);
    }

    #[tokio::test]
    async fn json_object_fields_are_searched_in_order() {
        let input = format!(r#"{{"note":"x","source":"{UNREACHABLE_MANIFEST}"}}"#);
        let url = resolver()
            .resolve(&input, &HeaderMap::new(), &allow_all())
            .await
            .unwrap();
        assert_eq!(url.as_str(), UNREACHABLE_MANIFEST);
    }

    #[tokio::test]
    async fn m3u8_candidates_are_preferred() {
        let input = format!("see http://127.0.0.1:9/page.html and {UNREACHABLE_MANIFEST}");
        let url = resolver()
            .resolve(&input, &HeaderMap::new(), &allow_all())
            .await
            .unwrap();
        assert_eq!(url.as_str(), UNREACHABLE_MANIFEST);
    }

    #[tokio::test]
    async fn probe_content_type_accepts_extensionless_manifest() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route(
            "/live",
            get(|| async {
                (
                    [("content-type", "application/vnd.apple.mpegurl")],
                    "#EXTM3U\n",
                )
            }),
        );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let input = format!("http://{addr}/live");
        let url = resolver()
            .resolve(&input, &HeaderMap::new(), &allow_all())
            .await
            .unwrap();
        assert_eq!(url.as_str(), input);
    }

    #[tokio::test]
    async fn input_without_urls_is_malformed() {
        let err = resolver()
            .resolve("definitely not a stream", &HeaderMap::new(), &allow_all())
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::UrlMalformed { .. }));
    }

    #[tokio::test]
    async fn disallowed_host_error_is_surfaced() {
        let err = resolver()
            .resolve(
                "https://blocked.example/live.m3u8",
                &HeaderMap::new(),
                &allow_only(&["ok.example"]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::HostNotAllowed { .. }));
    }
}
