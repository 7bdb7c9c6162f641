//! Sliding-window per-client rate limiting.
//!
//! Each client identifier owns an ordered list of request timestamps.
//! Admission trims everything that fell out of the window, then either
//! appends the new request or rejects it with the number of whole seconds
//! until the oldest in-window timestamp ages out. A periodic sweep
//! reclaims records for idle clients.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::ThrottleConfig;
use crate::errors::{ProxyError, ProxyResult};

pub struct Throttler {
    window: Duration,
    max_requests: usize,
    records: Mutex<HashMap<String, Vec<Instant>>>,
}

impl Throttler {
    pub fn new(config: &ThrottleConfig) -> Self {
        Self {
            window: config.window,
            max_requests: config.max_requests as usize,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Admit or reject a request from `client` right now.
    pub async fn check(&self, client: &str) -> ProxyResult<()> {
        self.check_at(client, Instant::now()).await
    }

    /// Admission decision at an explicit instant. The trim, the decision
    /// and the append happen under one lock so concurrent requests from
    /// the same client cannot slip past the limit.
    pub async fn check_at(&self, client: &str, now: Instant) -> ProxyResult<()> {
        let mut records = self.records.lock().await;
        let stamps = records.entry(client.to_string()).or_default();

        let window = self.window;
        stamps.retain(|stamp| now.duration_since(*stamp) < window);

        if stamps.len() >= self.max_requests {
            let retry_after = match stamps.first() {
                Some(oldest) => {
                    let wait = (*oldest + self.window).saturating_duration_since(now);
                    (wait.as_millis() as u64).div_ceil(1000)
                }
                None => self.window.as_secs(),
            };
            return Err(ProxyError::RateLimited { retry_after });
        }

        stamps.push(now);
        Ok(())
    }

    /// Remove records whose every timestamp aged out. Returns how many
    /// clients were reclaimed.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let window = self.window;
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|_, stamps| {
            stamps.retain(|stamp| now.duration_since(*stamp) < window);
            !stamps.is_empty()
        });
        before - records.len()
    }

    /// Number of clients currently tracked.
    pub async fn tracked_clients(&self) -> usize {
        self.records.lock().await.len()
    }

    /// Run the periodic sweep until `shutdown` fires.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let throttler = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = throttler.sweep().await;
                        if removed > 0 {
                            debug!(removed, "throttler sweep reclaimed idle clients");
                        }
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        })
    }
}
