/// Configuration default values
///
/// This module contains all the default values for configuration options,
/// making them easily changeable in one central location.
use std::time::Duration;

// Web server defaults
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

// Upstream fetch defaults.
// The upstream deadline must stay below the client-facing request timeout
// so upstream stalls surface as proxy timeouts, not dropped connections.
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(55);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

// Playlist cache defaults
pub const DEFAULT_PLAYLIST_TTL: Duration = Duration::from_secs(30);
pub const DEFAULT_PLAYLIST_MAX_ENTRIES: usize = 500;
pub const DEFAULT_CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

// Segment cache defaults (disabled unless explicitly enabled)
pub const DEFAULT_SEGMENT_CACHE_ENABLED: bool = false;
pub const DEFAULT_SEGMENT_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_SEGMENT_MAX_ENTRIES: usize = 1000;

// Throttler defaults
pub const DEFAULT_THROTTLE_WINDOW: Duration = Duration::from_secs(60);
pub const DEFAULT_THROTTLE_MAX_REQUESTS: u32 = 120;
pub const DEFAULT_THROTTLE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

// Metrics defaults
pub const TIMING_SAMPLE_CAP: usize = 1000;
