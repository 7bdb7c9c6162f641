use anyhow::Result;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub mod defaults;
pub mod duration_serde;

use defaults::*;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub throttle: ThrottleConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Client-facing total-request deadline. Must stay above
    /// `upstream.request_timeout`.
    #[serde(default = "default_request_timeout", with = "duration_serde::duration")]
    pub request_timeout: Duration,
    /// User agent sent upstream when neither the host template nor the
    /// caller supplies one.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout: default_request_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Deadline for a single upstream fetch, including the body.
    #[serde(
        default = "default_upstream_timeout",
        with = "duration_serde::duration"
    )]
    pub request_timeout: Duration,
    #[serde(default = "default_connect_timeout", with = "duration_serde::duration")]
    pub connect_timeout: Duration,
    /// Deadline for resolver HEAD probes.
    #[serde(default = "default_probe_timeout", with = "duration_serde::duration")]
    pub probe_timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_upstream_timeout(),
            connect_timeout: default_connect_timeout(),
            probe_timeout: default_probe_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_playlist_ttl", with = "duration_serde::duration")]
    pub playlist_ttl: Duration,
    #[serde(default = "default_playlist_max_entries")]
    pub playlist_max_entries: usize,
    #[serde(default = "default_sweep_interval", with = "duration_serde::duration")]
    pub sweep_interval: Duration,
    #[serde(default = "default_segment_cache_enabled")]
    pub segment_cache_enabled: bool,
    #[serde(default = "default_segment_ttl", with = "duration_serde::duration")]
    pub segment_ttl: Duration,
    #[serde(default = "default_segment_max_entries")]
    pub segment_max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            playlist_ttl: default_playlist_ttl(),
            playlist_max_entries: default_playlist_max_entries(),
            sweep_interval: default_sweep_interval(),
            segment_cache_enabled: default_segment_cache_enabled(),
            segment_ttl: default_segment_ttl(),
            segment_max_entries: default_segment_max_entries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    #[serde(default = "default_throttle_window", with = "duration_serde::duration")]
    pub window: Duration,
    #[serde(default = "default_throttle_max_requests")]
    pub max_requests: u32,
    #[serde(
        default = "default_throttle_sweep_interval",
        with = "duration_serde::duration"
    )]
    pub sweep_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            window: default_throttle_window(),
            max_requests: default_throttle_max_requests(),
            sweep_interval: default_throttle_sweep_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PolicyConfig {
    /// Hostnames admitted by the proxy. Empty means allow all. Entries
    /// also match any dot-suffix, so `example.com` admits
    /// `cdn.example.com`.
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
    /// Per-host upstream header templates, keyed the same way as
    /// `allowed_hosts` entries.
    #[serde(default)]
    pub host_headers: HashMap<String, HashMap<String, String>>,
}

impl Config {
    /// Load configuration from a TOML file with `HLS_PROXY_*` environment
    /// overrides. A missing file yields pure defaults.
    pub fn load_from_file(path: &str) -> Result<Self> {
        let mut config: Config = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("HLS_PROXY_").split("__"))
            .extract()?;

        // Hosting platforms hand the listen port over as a bare PORT var.
        if let Ok(port) = std::env::var("PORT")
            && let Ok(port) = port.parse()
        {
            config.web.port = port;
        }

        Ok(config)
    }
}

// Web defaults
fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

// Upstream defaults
fn default_upstream_timeout() -> Duration {
    DEFAULT_UPSTREAM_TIMEOUT
}

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

fn default_probe_timeout() -> Duration {
    DEFAULT_PROBE_TIMEOUT
}

// Cache defaults
fn default_playlist_ttl() -> Duration {
    DEFAULT_PLAYLIST_TTL
}

fn default_playlist_max_entries() -> usize {
    DEFAULT_PLAYLIST_MAX_ENTRIES
}

fn default_sweep_interval() -> Duration {
    DEFAULT_CACHE_SWEEP_INTERVAL
}

fn default_segment_cache_enabled() -> bool {
    DEFAULT_SEGMENT_CACHE_ENABLED
}

fn default_segment_ttl() -> Duration {
    DEFAULT_SEGMENT_TTL
}

fn default_segment_max_entries() -> usize {
    DEFAULT_SEGMENT_MAX_ENTRIES
}

// Throttle defaults
fn default_throttle_window() -> Duration {
    DEFAULT_THROTTLE_WINDOW
}

fn default_throttle_max_requests() -> u32 {
    DEFAULT_THROTTLE_MAX_REQUESTS
}

fn default_throttle_sweep_interval() -> Duration {
    DEFAULT_THROTTLE_SWEEP_INTERVAL
}
