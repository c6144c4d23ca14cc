use crate::cache::entry::CacheEntry;
use crate::cache::key::CacheKey;
use crate::feed::model::FeedPayload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Read counters and cleanup bookkeeping. Persisted alongside the
/// entries; reset only by an explicit `clear`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheMetadata {
    #[serde(rename = "hitCount")]
    pub hit_count: u64,
    #[serde(rename = "missCount")]
    pub miss_count: u64,
    #[serde(rename = "lastCleanup")]
    pub last_cleanup: Option<DateTime<Utc>>,
}

/// Point-in-time counter view for callers.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hit_count: u64,
    pub miss_count: u64,
    pub hit_rate: f64,
    pub size: usize,
}

#[derive(Default)]
struct StoreInner {
    entries: HashMap<CacheKey, CacheEntry<FeedPayload>>,
    meta: CacheMetadata,
}

/// Shared TTL map over typed feed payloads.
///
/// Expired entries stay in the map as stale fallbacks until a sweep or an
/// overwrite removes them. All reads and writes go through one lock, so a
/// `get` never observes a half-applied `set`. Overwrites are
/// last-writer-wins and always re-arm expiry from the current time.
#[derive(Clone, Default)]
pub struct TtlStore {
    inner: Arc<RwLock<StoreInner>>,
}

impl TtlStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh-only read. Counts a hit when a valid entry exists, a miss
    /// otherwise (absent or stale).
    pub async fn get(&self, key: &CacheKey) -> Option<FeedPayload> {
        let mut inner = self.inner.write().await;
        let lookup = inner
            .entries
            .get(key)
            .map(|entry| entry.is_valid().then(|| entry.data.clone()));

        match lookup {
            Some(Some(data)) => {
                inner.meta.hit_count += 1;
                debug!(cache_key = %key, "Cache HIT (fresh)");
                Some(data)
            }
            Some(None) => {
                inner.meta.miss_count += 1;
                debug!(cache_key = %key, "Cache MISS (stale entry retained)");
                None
            }
            None => {
                inner.meta.miss_count += 1;
                debug!(cache_key = %key, "Cache MISS (absent)");
                None
            }
        }
    }

    /// Fresh-only read without touching the counters.
    pub async fn peek(&self, key: &CacheKey) -> Option<FeedPayload> {
        let inner = self.inner.read().await;
        inner
            .entries
            .get(key)
            .filter(|entry| entry.is_valid())
            .map(|entry| entry.data.clone())
    }

    /// Any-freshness read for degraded fallback. No counter changes.
    pub async fn get_stale(&self, key: &CacheKey) -> Option<CacheEntry<FeedPayload>> {
        let inner = self.inner.read().await;
        inner.entries.get(key).cloned()
    }

    /// Unconditional overwrite. Expiry is derived from now, never from
    /// the previous entry.
    pub async fn set(&self, key: CacheKey, payload: FeedPayload, ttl: Duration) {
        let entry = CacheEntry::new(key.clone(), payload, ttl);
        let mut inner = self.inner.write().await;
        debug!(
            cache_key = %key,
            ttl_secs = ttl.as_secs(),
            items = entry.data.item_count(),
            "Cache SET"
        );
        inner.entries.insert(key, entry);
    }

    /// Explicit miss increment for paths that bypass `get`, such as a
    /// forced refresh.
    pub async fn record_miss(&self) {
        let mut inner = self.inner.write().await;
        inner.meta.miss_count += 1;
    }

    pub async fn remove(&self, key: &CacheKey) -> bool {
        let mut inner = self.inner.write().await;
        inner.entries.remove(key).is_some()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.entries.is_empty()
    }

    /// Age of whatever entry sits under the key, stale included.
    pub async fn entry_age(&self, key: &CacheKey) -> Option<Duration> {
        let inner = self.inner.read().await;
        inner.entries.get(key).map(|entry| entry.age())
    }

    /// Drop everything and zero the metadata. The only operation that
    /// resets the counters.
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        let dropped = inner.entries.len();
        inner.entries.clear();
        inner.meta = CacheMetadata::default();
        debug!(dropped, "Cache cleared");
    }

    /// Remove entries stale for longer than `grace` and stamp the
    /// cleanup time. Entries still inside the grace window survive as
    /// `get_stale` fallbacks.
    pub async fn sweep(&self, grace: Duration) -> usize {
        let now = Utc::now();
        let mut inner = self.inner.write().await;

        let sweepable: Vec<CacheKey> = inner
            .entries
            .values()
            .filter(|entry| entry.is_sweepable(grace, now))
            .map(|entry| entry.key.clone())
            .collect();

        for key in &sweepable {
            inner.entries.remove(key);
        }
        inner.meta.last_cleanup = Some(now);

        if !sweepable.is_empty() {
            debug!(removed = sweepable.len(), "Sweep removed expired entries");
        }
        sweepable.len()
    }

    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.read().await;
        let hits = inner.meta.hit_count;
        let misses = inner.meta.miss_count;
        let total = hits + misses;
        CacheStats {
            hit_count: hits,
            miss_count: misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            size: inner.entries.len(),
        }
    }

    pub async fn metadata(&self) -> CacheMetadata {
        self.inner.read().await.meta.clone()
    }

    /// Snapshot for the persistence adapter. Entries are sorted by key
    /// so the serialized form, and thus its checksum, is deterministic.
    pub async fn export(&self) -> (Vec<CacheEntry<FeedPayload>>, CacheMetadata) {
        let inner = self.inner.read().await;
        let mut entries: Vec<CacheEntry<FeedPayload>> = inner.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.key.as_str().cmp(b.key.as_str()));
        (entries, inner.meta.clone())
    }

    /// Replace the whole store with persisted state.
    pub async fn import(&self, entries: Vec<CacheEntry<FeedPayload>>, meta: CacheMetadata) {
        let mut inner = self.inner.write().await;
        inner.entries = entries
            .into_iter()
            .map(|entry| (entry.key.clone(), entry))
            .collect();
        inner.meta = meta;
    }
}
