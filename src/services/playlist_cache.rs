//! Short-TTL cache for rewritten playlists.
//!
//! Keys are canonical upstream URLs; values are the already-rewritten
//! manifest bytes, so a hit is served verbatim without parsing. Entries
//! expire lazily on read and in bulk from a background sweep; writes
//! overwrite and reset the TTL.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct CacheEntry {
    body: Bytes,
    stored_at: Instant,
}

/// Counters exposed on the metrics surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

pub struct PlaylistCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PlaylistCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Fetch a cached rewritten playlist, expiring it lazily when the TTL
    /// has passed.
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.body.clone())
            }
            Some(_) => {
                entries.remove(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a rewritten playlist, overwriting any previous entry and
    /// resetting its TTL. At capacity, expired entries are dropped first,
    /// then the oldest live one.
    pub async fn insert(&self, key: &str, body: Bytes) {
        let mut entries = self.entries.lock().await;

        if !entries.contains_key(key) && entries.len() >= self.max_entries {
            let ttl = self.ttl;
            entries.retain(|_, entry| entry.stored_at.elapsed() < ttl);

            if entries.len() >= self.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.stored_at)
                    .map(|(key, _)| key.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(
            key.to_string(),
            CacheEntry {
                body,
                stored_at: Instant::now(),
            },
        );
    }

    /// Drop every entry. Returns how many were removed.
    pub async fn flush(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let removed = entries.len();
        entries.clear();
        removed
    }

    /// Drop expired entries. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        let ttl = self.ttl;
        entries.retain(|_, entry| entry.stored_at.elapsed() < ttl);
        before - entries.len()
    }

    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.lock().await;
        CacheStats {
            entries: entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Run the periodic sweep until `shutdown` fires.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let cache = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = cache.sweep().await;
                        if removed > 0 {
                            debug!(removed, "playlist cache sweep");
                        }
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        })
    }
}
