//! Per-host request accounting and the structured request log.
//!
//! Counters are monotonic until an explicit reset. Timings are bounded
//! FIFO samples so a long-lived process reports the recent mean, not an
//! all-time one. Readers take a consistent snapshot; a slightly stale
//! read is fine, blocking writers is not, so the critical sections stay
//! tiny and never span I/O.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::info;

use crate::config::defaults::TIMING_SAMPLE_CAP;

/// Which proxy path served the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestCategory {
    Manifest,
    Segment,
}

impl RequestCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manifest => "manifest",
            Self::Segment => "segment",
        }
    }
}

/// One terminated request, as reported by a handler.
#[derive(Debug)]
pub struct RequestRecord<'a> {
    pub host: &'a str,
    pub category: RequestCategory,
    pub status: u16,
    pub success: bool,
    pub error_code: Option<&'a str>,
    pub duration: Duration,
    /// Already passed through `UrlSafety::sanitize_for_logging`; raw URLs
    /// with tokens must never reach this field.
    pub sanitized_url: &'a str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastError {
    pub code: String,
    pub at: DateTime<Utc>,
}

#[derive(Default)]
struct HostStats {
    requests: u64,
    errors: u64,
    manifest_requests: u64,
    manifest_errors: u64,
    segment_requests: u64,
    segment_errors: u64,
    manifest_timings: VecDeque<f64>,
    segment_timings: VecDeque<f64>,
    last_error: Option<LastError>,
}

impl HostStats {
    fn apply(&mut self, record: &RequestRecord<'_>, now: DateTime<Utc>) {
        self.requests += 1;
        if !record.success {
            self.errors += 1;
        }

        let millis = record.duration.as_secs_f64() * 1000.0;
        match record.category {
            RequestCategory::Manifest => {
                self.manifest_requests += 1;
                if !record.success {
                    self.manifest_errors += 1;
                }
                push_sample(&mut self.manifest_timings, millis);
            }
            RequestCategory::Segment => {
                self.segment_requests += 1;
                if !record.success {
                    self.segment_errors += 1;
                }
                push_sample(&mut self.segment_timings, millis);
            }
        }

        if !record.success && let Some(code) = record.error_code {
            self.last_error = Some(LastError {
                code: code.to_string(),
                at: now,
            });
        }
    }

    fn report(&self) -> HostReport {
        HostReport {
            requests: self.requests,
            errors: self.errors,
            success_rate: percentage(self.requests - self.errors, self.requests),
            segment_error_rate: percentage(self.segment_errors, self.segment_requests),
            manifest: CategoryReport {
                requests: self.manifest_requests,
                errors: self.manifest_errors,
                mean_duration_ms: mean(&self.manifest_timings),
            },
            segment: CategoryReport {
                requests: self.segment_requests,
                errors: self.segment_errors,
                mean_duration_ms: mean(&self.segment_timings),
            },
            last_error: self.last_error.clone(),
        }
    }
}

fn push_sample(samples: &mut VecDeque<f64>, value: f64) {
    if samples.len() == TIMING_SAMPLE_CAP {
        samples.pop_front();
    }
    samples.push_back(value);
}

fn mean(samples: &VecDeque<f64>) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    round2(samples.iter().sum::<f64>() / samples.len() as f64)
}

fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    round2(part as f64 * 100.0 / whole as f64)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryReport {
    pub requests: u64,
    pub errors: u64,
    pub mean_duration_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostReport {
    pub requests: u64,
    pub errors: u64,
    /// Percentage with two decimals.
    pub success_rate: f64,
    /// Percentage with two decimals.
    pub segment_error_rate: f64,
    pub manifest: CategoryReport,
    pub segment: CategoryReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<LastError>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub global: HostReport,
    pub hosts: BTreeMap<String, HostReport>,
}

#[derive(Default)]
struct RegistryInner {
    global: HostStats,
    hosts: HashMap<String, HostStats>,
}

/// Process-wide metrics registry, injected into handlers via the app
/// state.
#[derive(Default)]
pub struct MetricsRegistry {
    inner: Mutex<RegistryInner>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account one terminated request and emit its structured log line.
    pub async fn record(&self, record: RequestRecord<'_>) {
        let now = Utc::now();
        {
            let mut inner = self.inner.lock().await;
            inner.global.apply(&record, now);
            inner
                .hosts
                .entry(record.host.to_string())
                .or_default()
                .apply(&record, now);
        }

        info!(
            url = %record.sanitized_url,
            host = %record.host,
            category = %record.category.as_str(),
            success = record.success,
            status = record.status,
            duration_ms = record.duration.as_secs_f64() * 1000.0,
            "request completed"
        );
    }

    /// Consistent point-in-time view of all counters.
    pub async fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.lock().await;
        MetricsSnapshot {
            global: inner.global.report(),
            hosts: inner
                .hosts
                .iter()
                .map(|(host, stats)| (host.clone(), stats.report()))
                .collect(),
        }
    }

    /// Clear every counter and timing buffer.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        *inner = RegistryInner::default();
    }
}
