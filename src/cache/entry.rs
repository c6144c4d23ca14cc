use crate::cache::key::CacheKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A single cached value with absolute freshness bounds.
///
/// Timestamps are wall-clock UTC so entries survive a persistence round
/// trip. An entry past `expires_at` is stale rather than gone: it stays
/// available for degraded fallback until a sweep or an overwrite removes
/// it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub key: CacheKey,
    pub data: T,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "expiresAt")]
    pub expires_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    /// Build an entry expiring `ttl` from now.
    ///
    /// A zero TTL is a programming error, not a runtime condition, and
    /// fails fast.
    pub fn new(key: CacheKey, data: T, ttl: Duration) -> Self {
        assert!(!ttl.is_zero(), "cache entry TTL must be positive");
        let ttl = chrono::Duration::from_std(ttl).expect("cache entry TTL out of range");
        let now = Utc::now();
        Self {
            key,
            data,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_valid(&self) -> bool {
        Utc::now() < self.expires_at
    }

    pub fn is_stale(&self) -> bool {
        !self.is_valid()
    }

    /// Time since the entry was written. Clock regressions clamp to zero.
    pub fn age(&self) -> Duration {
        (Utc::now() - self.created_at).to_std().unwrap_or_default()
    }

    /// True once the entry has been stale for longer than `grace`,
    /// meaning it is no longer worth keeping even as a fallback.
    pub fn is_sweepable(&self, grace: Duration, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(grace) {
            Ok(grace) => self.expires_at < now - grace,
            Err(_) => false,
        }
    }
}
