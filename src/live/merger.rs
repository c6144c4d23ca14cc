use crate::cache::key::{CacheKey, DataKind};
use crate::cache::persistence::save_cache;
use crate::cache::store::TtlStore;
use crate::config::CacheConfig;
use crate::feed::model::{FeedPayload, FeedSnapshot};
use crate::metrics::SharedMetrics;
use tracing::warn;

/// Applies push snapshots to the cache.
///
/// Pushed data is always a default view, so it lands on the root key of
/// its kind with the same TTL a fetched entry would get. Parameterized
/// views are never touched by the push channel.
#[derive(Clone)]
pub struct UpdateMerger {
    store: TtlStore,
    config: CacheConfig,
    metrics: SharedMetrics,
}

impl UpdateMerger {
    pub fn new(store: TtlStore, config: CacheConfig, metrics: SharedMetrics) -> Self {
        Self {
            store,
            config,
            metrics,
        }
    }

    /// Write every kind present in the snapshot. Returns the number of
    /// kinds written.
    pub async fn apply(&self, snapshot: &FeedSnapshot) -> usize {
        let mut written = 0;

        if let Some(items) = &snapshot.latest_news {
            self.write(DataKind::LatestNews, FeedPayload::News(items.clone())).await;
            written += 1;
        }
        if let Some(items) = &snapshot.trending_topics {
            self.write(DataKind::TrendingTopics, FeedPayload::Topics(items.clone())).await;
            written += 1;
        }
        if let Some(items) = &snapshot.social_hooks {
            self.write(DataKind::SocialHooks, FeedPayload::Hooks(items.clone())).await;
            written += 1;
        }

        if written > 0 {
            self.metrics.cache_entries.set(self.store.len().await as f64);
            self.persist_after_merge().await;
        }

        written
    }

    async fn write(&self, kind: DataKind, payload: FeedPayload) {
        let ttl = self.config.ttl_for(kind);
        self.store.set(CacheKey::root(kind), payload, ttl).await;
    }

    async fn persist_after_merge(&self) {
        if let Some(dir) = &self.config.persist_dir {
            match save_cache(&self.store, dir).await {
                Ok(()) => self.metrics.record_persistence("save", "success"),
                Err(e) => {
                    self.metrics.record_persistence("save", "error");
                    warn!(error = %e, "Failed to persist cache after merge");
                }
            }
        }
    }
}
