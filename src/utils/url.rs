//! URL normalization and safety checks.
//!
//! Every URL accepted from a client passes through this module before any
//! other component sees it. Downstream code (cache keys, the allowlist,
//! upstream fetches) always operates on the canonical serialization
//! produced here, so equality and lookups never depend on how the caller
//! happened to encode the URL.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::errors::{ProxyError, ProxyResult};

/// Matches every URL occurrence in a string; more than one in a single
/// input means concatenation or smuggling.
static URL_OCCURRENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)https?://").expect("static pattern"));

/// Query parameter names whose values never reach the logs.
const SENSITIVE_PARAMS: &[&str] = &[
    "token",
    "key",
    "auth",
    "signature",
    "sig",
    "access_token",
    "api_key",
];

/// URL safety and normalization utilities.
pub struct UrlSafety;

impl UrlSafety {
    /// Normalize a caller-supplied URL into its canonical form.
    ///
    /// Trims whitespace, strips any fragment, parses the input as a URL
    /// and, if that fails, percent-decodes exactly once and retries. Only
    /// `http` and `https` schemes are admitted. The result is idempotent:
    /// normalizing a canonical URL returns it unchanged.
    pub fn normalize(input: &str) -> ProxyResult<Url> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ProxyError::url_malformed("empty URL"));
        }

        let without_fragment = match trimmed.split_once('#') {
            Some((head, _)) => head,
            None => trimmed,
        };

        let mut parsed = match Url::parse(without_fragment) {
            Ok(url) => url,
            Err(_) => {
                let decoded = urlencoding::decode(without_fragment)
                    .map_err(|_| ProxyError::url_malformed("invalid percent-encoding"))?;
                Url::parse(&decoded)
                    .map_err(|e| ProxyError::url_malformed(format!("unparseable URL: {e}")))?
            }
        };

        match parsed.scheme() {
            "http" | "https" => {}
            other => {
                return Err(ProxyError::url_malformed(format!(
                    "unsupported scheme '{other}'"
                )));
            }
        }

        // A fragment can survive the pre-parse strip when it arrives
        // percent-encoded.
        parsed.set_fragment(None);

        Ok(parsed)
    }

    /// Reject inputs that try to smuggle a second URL past the proxy.
    ///
    /// Two patterns are refused: more than one `http(s)://` occurrence in
    /// the raw input, and query parameter values that are themselves URLs
    /// carrying their own query string or a once-decoded JSON payload.
    pub fn validate_safety(input: &str) -> ProxyResult<()> {
        let trimmed = input.trim();

        if URL_OCCURRENCE.find_iter(trimmed).count() > 1 {
            return Err(ProxyError::url_malformed(
                "multiple URLs in a single input",
            ));
        }

        let parsed = match Url::parse(trimmed) {
            Ok(url) => url,
            // Normalization reports unparseable input with a better message.
            Err(_) => return Ok(()),
        };

        for (name, value) in parsed.query_pairs() {
            if !value.starts_with("http://") && !value.starts_with("https://") {
                continue;
            }
            if value.contains('?') || value.contains('&') {
                return Err(ProxyError::url_malformed(format!(
                    "nested URL in query parameter '{name}'"
                )));
            }
            if let Ok(decoded) = urlencoding::decode(&value)
                && serde_json::from_str::<serde_json::Value>(&decoded).is_ok()
            {
                return Err(ProxyError::url_malformed(format!(
                    "double-encoded payload in query parameter '{name}'"
                )));
            }
        }

        Ok(())
    }

    /// Render a URL for the logs with sensitive query values blanked.
    ///
    /// Scheme, host and path stay visible. Inputs that do not parse are
    /// truncated to their first 100 bytes.
    pub fn sanitize_for_logging(input: &str) -> String {
        match Url::parse(input.trim()) {
            Ok(mut parsed) => {
                if parsed.query().is_some() {
                    let redacted: Vec<String> = parsed
                        .query_pairs()
                        .map(|(name, value)| {
                            if Self::is_sensitive(&name) {
                                format!("{name}=[REDACTED]")
                            } else {
                                format!("{name}={value}")
                            }
                        })
                        .collect();
                    parsed.set_query(Some(&redacted.join("&")));
                }
                parsed.to_string()
            }
            Err(_) => {
                let mut end = input.len().min(100);
                while !input.is_char_boundary(end) {
                    end -= 1;
                }
                format!("{}…", &input[..end])
            }
        }
    }

    fn is_sensitive(name: &str) -> bool {
        SENSITIVE_PARAMS
            .iter()
            .any(|param| name.eq_ignore_ascii_case(param))
    }
}
