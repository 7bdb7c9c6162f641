//! Optional full-body cache for media segments and encryption keys.
//!
//! Disabled by default. When enabled it holds complete non-range
//! responses under LRU replacement with a per-entry TTL; range responses
//! are never cached, so partial-content semantics stay untouched.

use std::num::NonZeroUsize;
use std::time::Duration;

use bytes::Bytes;
use lru::LruCache;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// A complete cached upstream response body.
#[derive(Debug, Clone)]
pub struct CachedSegment {
    pub content_type: String,
    pub body: Bytes,
}

struct SegmentEntry {
    segment: CachedSegment,
    stored_at: Instant,
}

pub struct SegmentCache {
    entries: Option<Mutex<LruCache<String, SegmentEntry>>>,
    ttl: Duration,
}

impl SegmentCache {
    pub fn new(enabled: bool, max_entries: usize, ttl: Duration) -> Self {
        let entries = enabled.then(|| {
            let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
            Mutex::new(LruCache::new(capacity))
        });
        Self { entries, ttl }
    }

    pub fn is_enabled(&self) -> bool {
        self.entries.is_some()
    }

    pub async fn get(&self, key: &str) -> Option<CachedSegment> {
        let entries = self.entries.as_ref()?;
        let mut entries = entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => Some(entry.segment.clone()),
            Some(_) => {
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    pub async fn insert(&self, key: String, segment: CachedSegment) {
        if let Some(entries) = self.entries.as_ref() {
            entries.lock().await.put(
                key,
                SegmentEntry {
                    segment,
                    stored_at: Instant::now(),
                },
            );
        }
    }
}
