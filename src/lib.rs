//! Newswire - live news feed cache
//!
//! A read-through cache over a news backend with:
//! - TTL-based in-memory caching with stale fallback on backend failure
//! - A push channel that folds live updates into the cache
//! - Periodic sweeping of entries past their grace window
//! - Prometheus metrics
//! - Disk persistence for warm restarts

pub mod cache;
pub mod config;
pub mod error;
pub mod feed;
pub mod live;
pub mod metrics;
pub mod utils;

pub use cache::{CacheEntry, CacheKey, CacheMetadata, CacheStats, DataKind, Sweeper, TtlStore};
pub use config::{CacheConfig, Config, FeedConfig, LiveConfig};
pub use error::FeedError;
pub use feed::{
    FeedApi, FeedPayload, FeedService, FeedSnapshot, FeedStats, NewsItem, SocialHook,
    TrendingTopic,
};
pub use live::{ConnectionState, LiveClient, LiveEvent, UpdateMerger};
pub use metrics::{create_metrics, Metrics, SharedMetrics};

use crate::cache::persistence::{load_cache, save_cache, slot_files_exist};
use std::sync::Arc;
use tracing::{error, info, warn};

/// The wired-up feed: store, fetch-through service, live channel, and
/// sweeper.
///
/// All shared state hangs off this context; there are no globals.
/// Create one with [`FeedContext::initialize`] and call
/// [`FeedContext::shutdown`] to stop background work and persist the
/// final cache state.
pub struct FeedContext {
    pub config: Config,
    pub metrics: SharedMetrics,
    pub store: TtlStore,
    pub service: FeedService,
    pub live: Arc<LiveClient>,
    sweeper: Sweeper,
}

impl FeedContext {
    /// Wire up the whole feed. When a cache directory is configured and
    /// its slots are present, the store starts warm from disk; any load
    /// problem just means a cold start.
    pub async fn initialize(config: Config) -> Self {
        let metrics = create_metrics();
        let store = TtlStore::new();

        if let Some(dir) = &config.cache.persist_dir {
            if slot_files_exist(dir).await {
                match load_cache(dir).await {
                    Ok((entries, meta)) => {
                        info!(
                            entries = entries.len(),
                            hits = meta.hit_count,
                            misses = meta.miss_count,
                            "Warm start from persisted cache"
                        );
                        store.import(entries, meta).await;
                        metrics.record_persistence("load", "success");
                    }
                    Err(e) => {
                        warn!(error = %e, "Persisted cache unusable, starting cold");
                        metrics.record_persistence("load", "error");
                    }
                }
            } else {
                info!(dir = %dir.display(), "No persisted cache found, starting cold");
            }
        }
        metrics.cache_entries.set(store.len().await as f64);

        let api = FeedApi::new(config.feed.clone());
        let service = FeedService::new(store.clone(), api, config.cache.clone(), metrics.clone());
        let merger = UpdateMerger::new(store.clone(), config.cache.clone(), metrics.clone());
        let live = Arc::new(LiveClient::new(
            config.feed.push_url.clone(),
            config.live.clone(),
            merger,
            metrics.clone(),
        ));
        let sweeper = Sweeper::spawn(
            store.clone(),
            metrics.clone(),
            config.cache.sweep_interval,
            config.cache.grace_window,
            config.cache.persist_dir.clone(),
        );

        Self {
            config,
            metrics,
            store,
            service,
            live,
            sweeper,
        }
    }

    /// Stop the live channel and the sweeper, then persist the final
    /// cache state.
    pub async fn shutdown(self) {
        self.live.disconnect().await;
        self.sweeper.shutdown().await;

        if let Some(dir) = &self.config.cache.persist_dir {
            match save_cache(&self.store, dir).await {
                Ok(()) => {
                    self.metrics.record_persistence("save", "success");
                    info!("Cache persisted on shutdown");
                }
                Err(e) => {
                    self.metrics.record_persistence("save", "error");
                    error!(error = %e, "Failed to persist cache on shutdown");
                }
            }
        }
        info!("Feed context shut down");
    }
}
