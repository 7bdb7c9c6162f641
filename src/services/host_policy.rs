//! Host allowlisting and per-host upstream header templates.
//!
//! Both lookups use the same matching rule: a hostname matches an entry
//! when it equals the entry or when the entry is a dot-suffix of it,
//! peeling labels from the left. `cdn.media.example.com` is admitted by
//! `example.com`, and picks up the most specific header template first.
//!
//! The policy is read-only after construction, so handlers share it
//! without locking.

use std::collections::HashMap;

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use tracing::warn;

use crate::config::PolicyConfig;

pub struct HostPolicy {
    allow: Vec<String>,
    templates: HashMap<String, HeaderMap>,
}

impl HostPolicy {
    pub fn from_config(config: &PolicyConfig) -> Self {
        let allow = config
            .allowed_hosts
            .iter()
            .map(|host| host.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|host| !host.is_empty())
            .collect();

        let mut templates = HashMap::new();
        for (host, entries) in &config.host_headers {
            let mut headers = HeaderMap::new();
            for (name, value) in entries {
                match (
                    HeaderName::from_bytes(name.as_bytes()),
                    HeaderValue::from_str(value),
                ) {
                    (Ok(name), Ok(value)) => {
                        headers.insert(name, value);
                    }
                    _ => warn!(
                        host = %host,
                        header = %name,
                        "ignoring invalid header template entry"
                    ),
                }
            }
            templates.insert(host.to_ascii_lowercase(), headers);
        }

        Self { allow, templates }
    }

    /// Whether the allowlist admits `host`. An empty allowlist admits
    /// everything.
    pub fn is_allowed(&self, host: &str) -> bool {
        if self.allow.is_empty() {
            return true;
        }
        let host = host.to_ascii_lowercase();
        Self::label_suffixes(&host).any(|suffix| self.allow.iter().any(|entry| entry == suffix))
    }

    /// Upstream headers for `host`: the most specific matching template,
    /// with caller-supplied headers layered on top (caller wins per
    /// field).
    pub fn headers_for(&self, host: &str, caller: &HeaderMap) -> HeaderMap {
        let host = host.to_ascii_lowercase();
        let mut merged = Self::label_suffixes(&host)
            .find_map(|suffix| self.templates.get(suffix))
            .cloned()
            .unwrap_or_default();

        for (name, value) in caller {
            merged.insert(name.clone(), value.clone());
        }

        merged
    }

    /// `cdn.media.example.com` yields itself, then `media.example.com`,
    /// `example.com` and `com`.
    fn label_suffixes(host: &str) -> impl Iterator<Item = &str> {
        std::iter::successors(Some(host), |current| {
            current.split_once('.').map(|(_, rest)| rest)
        })
    }
}
