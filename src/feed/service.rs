use crate::cache::key::{CacheKey, DataKind};
use crate::cache::persistence::save_cache;
use crate::cache::store::{CacheStats, TtlStore};
use crate::config::CacheConfig;
use crate::error::FeedError;
use crate::feed::api::FeedApi;
use crate::feed::model::{FeedData, FeedStats, NewsItem, SocialHook, TrendingTopic};
use crate::metrics::SharedMetrics;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Notify, RwLock};
use tracing::{debug, info, warn};

/// Fetch-through façade over the TTL store and the remote backend.
///
/// Every accessor follows the same path: fresh cache hit, else remote
/// fetch, else stale fallback. Concurrent callers of the same key are
/// coalesced onto one remote fetch; followers wait for the leader and
/// read its result from the store.
#[derive(Clone)]
pub struct FeedService {
    store: TtlStore,
    api: FeedApi,
    config: CacheConfig,
    metrics: SharedMetrics,
    inflight: Arc<RwLock<HashMap<CacheKey, Arc<Notify>>>>,
}

impl FeedService {
    pub fn new(store: TtlStore, api: FeedApi, config: CacheConfig, metrics: SharedMetrics) -> Self {
        Self {
            store,
            api,
            config,
            metrics,
            inflight: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn latest_news(
        &self,
        category: Option<&str>,
        force_refresh: bool,
    ) -> Result<Vec<NewsItem>, FeedError> {
        let mut params: Vec<(&str, &str)> = Vec::new();
        if let Some(category) = category {
            params.push(("category", category));
        }
        let key = CacheKey::compute(DataKind::LatestNews, &params);

        let api = self.api.clone();
        let category = category.map(str::to_string);
        self.fetch_through(DataKind::LatestNews, key, force_refresh, move || async move {
            api.latest_news(category.as_deref()).await
        })
        .await
    }

    pub async fn trending_topics(
        &self,
        timeframe: Option<&str>,
        force_refresh: bool,
    ) -> Result<Vec<TrendingTopic>, FeedError> {
        let mut params: Vec<(&str, &str)> = Vec::new();
        if let Some(timeframe) = timeframe {
            params.push(("timeframe", timeframe));
        }
        let key = CacheKey::compute(DataKind::TrendingTopics, &params);

        let api = self.api.clone();
        let timeframe = timeframe.map(str::to_string);
        self.fetch_through(DataKind::TrendingTopics, key, force_refresh, move || async move {
            api.trending_topics(timeframe.as_deref()).await
        })
        .await
    }

    pub async fn social_hooks(
        &self,
        platforms: Option<&[String]>,
        force_refresh: bool,
    ) -> Result<Vec<SocialHook>, FeedError> {
        let joined = platforms.map(|p| p.join(","));
        let mut params: Vec<(&str, &str)> = Vec::new();
        if let Some(joined) = joined.as_deref() {
            params.push(("platforms", joined));
        }
        let key = CacheKey::compute(DataKind::SocialHooks, &params);

        let api = self.api.clone();
        let platforms = platforms.map(|p| p.to_vec());
        self.fetch_through(DataKind::SocialHooks, key, force_refresh, move || async move {
            api.social_hooks(platforms.as_deref()).await
        })
        .await
    }

    pub async fn feed_stats(&self, force_refresh: bool) -> Result<FeedStats, FeedError> {
        let key = CacheKey::root(DataKind::FeedStats);

        let api = self.api.clone();
        self.fetch_through(DataKind::FeedStats, key, force_refresh, move || async move {
            api.feed_stats().await
        })
        .await
    }

    pub async fn search_news(
        &self,
        query: &str,
        category: Option<&str>,
        force_refresh: bool,
    ) -> Result<Vec<NewsItem>, FeedError> {
        let mut params: Vec<(&str, &str)> = vec![("query", query)];
        if let Some(category) = category {
            params.push(("category", category));
        }
        let key = CacheKey::compute(DataKind::Search, &params);

        let api = self.api.clone();
        let query = query.to_string();
        let category = category.map(str::to_string);
        self.fetch_through(DataKind::Search, key, force_refresh, move || async move {
            api.search_news(&query, category.as_deref()).await
        })
        .await
    }

    /// Warm the default views at boot. Per-kind failures are logged and
    /// skipped; a cold backend must not prevent startup.
    pub async fn prime(&self) {
        info!("Priming default feed views");
        if let Err(e) = self.latest_news(None, false).await {
            warn!(error = %e, "Failed to prime latest news");
        }
        if let Err(e) = self.trending_topics(None, false).await {
            warn!(error = %e, "Failed to prime trending topics");
        }
        if let Err(e) = self.social_hooks(None, false).await {
            warn!(error = %e, "Failed to prime social hooks");
        }
        if let Err(e) = self.feed_stats(false).await {
            warn!(error = %e, "Failed to prime feed stats");
        }
    }

    /// True when a fresh entry exists for the view. Does not count as a
    /// read.
    pub async fn is_cached(&self, kind: DataKind, params: &[(&str, &str)]) -> bool {
        self.store.peek(&CacheKey::compute(kind, params)).await.is_some()
    }

    /// Age of the cached view, stale entries included.
    pub async fn cache_age(&self, kind: DataKind, params: &[(&str, &str)]) -> Option<Duration> {
        self.store.entry_age(&CacheKey::compute(kind, params)).await
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.store.stats().await
    }

    /// Drop all entries and reset the counters, then persist the empty
    /// state so a restart does not resurrect cleared data.
    pub async fn clear_cache(&self) {
        self.store.clear().await;
        self.metrics.cache_entries.set(0.0);
        self.persist_after_mutation().await;
    }

    async fn fetch_through<T, F, Fut>(
        &self,
        kind: DataKind,
        key: CacheKey,
        force_refresh: bool,
        fetch: F,
    ) -> Result<T, FeedError>
    where
        T: FeedData + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, FeedError>> + Send + 'static,
    {
        if !force_refresh {
            if let Some(payload) = self.store.get(&key).await {
                self.metrics.record_cache_read(true);
                return T::from_payload(payload).ok_or_else(|| shape_error(&key));
            }
            self.metrics.record_cache_read(false);
        } else {
            // Forced refresh never reads, but still counts as a miss.
            self.store.record_miss().await;
            self.metrics.record_cache_read(false);
            debug!(cache_key = %key, "Forced refresh, bypassing cache");
        }

        // Single-flight: first caller leads the fetch, the rest wait on
        // its Notify. Interest is registered before the map lock drops,
        // so a fast leader cannot notify into the void.
        let leader = {
            let mut inflight = self.inflight.write().await;
            match inflight.get(&key) {
                Some(notify) => {
                    let notify = notify.clone();
                    let notified = notify.notified();
                    tokio::pin!(notified);
                    notified.as_mut().enable();
                    drop(inflight);
                    debug!(cache_key = %key, "Waiting on in-flight fetch");
                    notified.await;
                    false
                }
                None => {
                    inflight.insert(key.clone(), Arc::new(Notify::new()));
                    true
                }
            }
        };

        if !leader {
            if let Some(payload) = self.store.peek(&key).await {
                return T::from_payload(payload).ok_or_else(|| shape_error(&key));
            }
            // The leader failed; fall back like it did.
            return self
                .stale_fallback(kind, &key, FeedError::RemoteUnavailable("Coalesced fetch failed".into()))
                .await;
        }

        // The leader's fetch runs in its own task: a caller that drops
        // this future mid-fetch must not abandon the in-flight slot,
        // and the fetched data still lands in the cache.
        let task = {
            let service = self.clone();
            let key = key.clone();
            tokio::spawn(async move { service.lead_fetch(kind, key, fetch).await })
        };

        match task.await {
            Ok(Ok(data)) => Ok(data),
            Ok(Err(e)) => self.stale_fallback(kind, &key, e).await,
            Err(e) => {
                // The fetch task panicked; free the key for later calls.
                self.release_flight(&key).await;
                warn!(cache_key = %key, kind = %kind, error = %e, "Fetch task failed");
                self.stale_fallback(
                    kind,
                    &key,
                    FeedError::RemoteUnavailable(format!("Fetch task failed: {}", e)),
                )
                .await
            }
        }
    }

    /// Leader half of the single-flight path: fetch, store on success,
    /// and release the in-flight slot on every exit.
    async fn lead_fetch<T, F, Fut>(
        &self,
        kind: DataKind,
        key: CacheKey,
        fetch: F,
    ) -> Result<T, FeedError>
    where
        T: FeedData,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FeedError>>,
    {
        let started = Instant::now();
        let result = fetch().await;
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok(data) => {
                self.metrics.record_fetch(kind.as_str(), "success", elapsed);
                let ttl = self.config.ttl_for(kind);
                self.store.set(key.clone(), data.clone().into_payload(), ttl).await;
                self.metrics.cache_entries.set(self.store.len().await as f64);
                self.persist_after_mutation().await;
                self.release_flight(&key).await;
                Ok(data)
            }
            Err(e) => {
                self.metrics.record_fetch(kind.as_str(), "error", elapsed);
                self.release_flight(&key).await;
                warn!(cache_key = %key, kind = %kind, error = %e, "Remote fetch failed");
                Err(e)
            }
        }
    }

    /// Serve a stale entry after a remote failure, or surface the lack
    /// of any fallback. Non-remote causes propagate untouched.
    async fn stale_fallback<T: FeedData>(
        &self,
        kind: DataKind,
        key: &CacheKey,
        cause: FeedError,
    ) -> Result<T, FeedError> {
        if !cause.is_remote() {
            return Err(cause);
        }

        if let Some(entry) = self.store.get_stale(key).await {
            let age_secs = entry.age().as_secs();
            if let Some(data) = T::from_payload(entry.data) {
                self.metrics.record_stale_served();
                warn!(
                    cache_key = %key,
                    kind = %kind,
                    age_secs,
                    "Serving stale entry after remote failure"
                );
                return Ok(data);
            }
        }

        Err(FeedError::NoCachedFallback {
            key: key.to_string(),
            source: Box::new(cause),
        })
    }

    async fn release_flight(&self, key: &CacheKey) {
        let mut inflight = self.inflight.write().await;
        if let Some(notify) = inflight.remove(key) {
            notify.notify_waiters();
        }
    }

    async fn persist_after_mutation(&self) {
        if let Some(dir) = &self.config.persist_dir {
            match save_cache(&self.store, dir).await {
                Ok(()) => self.metrics.record_persistence("save", "success"),
                Err(e) => {
                    self.metrics.record_persistence("save", "error");
                    warn!(error = %e, "Failed to persist cache");
                }
            }
        }
    }
}

fn shape_error(key: &CacheKey) -> FeedError {
    FeedError::Cache(format!("Cached payload under {} has the wrong shape", key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeedConfig;
    use crate::feed::model::FeedPayload;
    use crate::metrics::create_metrics;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn service() -> FeedService {
        FeedService::new(
            TtlStore::new(),
            FeedApi::new(FeedConfig::default()),
            CacheConfig::default(),
            create_metrics(),
        )
    }

    fn items(id: &str) -> Vec<NewsItem> {
        vec![NewsItem {
            id: id.into(),
            title: format!("title {}", id),
            ..Default::default()
        }]
    }

    #[tokio::test]
    async fn miss_fetches_then_hit_skips_the_remote() {
        let svc = service();
        let key = CacheKey::root(DataKind::LatestNews);
        let calls = Arc::new(AtomicUsize::new(0));

        let c = calls.clone();
        let first = svc
            .fetch_through(DataKind::LatestNews, key.clone(), false, move || async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(items("fresh"))
            })
            .await
            .unwrap();
        assert_eq!(first[0].id, "fresh");

        let c = calls.clone();
        let second = svc
            .fetch_through(DataKind::LatestNews, key, false, move || async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(items("never"))
            })
            .await
            .unwrap();
        assert_eq!(second[0].id, "fresh");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = svc.cache_stats().await;
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.miss_count, 1);
    }

    #[tokio::test]
    async fn forced_refresh_bypasses_a_fresh_entry() {
        let svc = service();
        let key = CacheKey::root(DataKind::LatestNews);
        let calls = Arc::new(AtomicUsize::new(0));

        let c = calls.clone();
        svc.fetch_through(DataKind::LatestNews, key.clone(), false, move || async move {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(items("v1"))
        })
        .await
        .unwrap();

        let c = calls.clone();
        let refreshed = svc
            .fetch_through(DataKind::LatestNews, key, true, move || async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(items("v2"))
            })
            .await
            .unwrap();

        assert_eq!(refreshed[0].id, "v2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // Both the initial miss and the forced bypass count as misses.
        let stats = svc.cache_stats().await;
        assert_eq!(stats.miss_count, 2);
        assert_eq!(stats.hit_count, 0);
    }

    #[tokio::test]
    async fn stale_entry_is_served_when_the_remote_fails() {
        let svc = service();
        let key = CacheKey::root(DataKind::LatestNews);
        svc.store
            .set(key.clone(), FeedPayload::News(items("old")), Duration::from_millis(30))
            .await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        let result: Vec<NewsItem> = svc
            .fetch_through(DataKind::LatestNews, key, false, || async {
                Err(FeedError::RemoteUnavailable("backend down".into()))
            })
            .await
            .unwrap();

        assert_eq!(result[0].id, "old");
        let stats = svc.cache_stats().await;
        assert_eq!(stats.miss_count, 1);
    }

    #[tokio::test]
    async fn no_fallback_without_a_prior_entry() {
        let svc = service();
        let key = CacheKey::root(DataKind::LatestNews);

        let result: Result<Vec<NewsItem>, _> = svc
            .fetch_through(DataKind::LatestNews, key, false, || async {
                Err(FeedError::RemoteUnavailable("backend down".into()))
            })
            .await;

        match result {
            Err(FeedError::NoCachedFallback { source, .. }) => {
                assert!(matches!(*source, FeedError::RemoteUnavailable(_)));
            }
            other => panic!("expected NoCachedFallback, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn concurrent_cold_calls_share_one_fetch() {
        let svc = service();
        let key = CacheKey::root(DataKind::LatestNews);
        let calls = Arc::new(AtomicUsize::new(0));

        let c1 = calls.clone();
        let first = svc.fetch_through(DataKind::LatestNews, key.clone(), false, move || async move {
            c1.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(items("led"))
        });

        let c2 = calls.clone();
        let second = svc.fetch_through(DataKind::LatestNews, key.clone(), false, move || async move {
            c2.fetch_add(1, Ordering::SeqCst);
            Ok(items("follower"))
        });

        let (a, b) = tokio::join!(first, second);
        assert_eq!(a.unwrap()[0].id, "led");
        assert_eq!(b.unwrap()[0].id, "led");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn followers_fall_back_when_the_leader_fails() {
        let svc = service();
        let key = CacheKey::root(DataKind::LatestNews);

        let first = svc.fetch_through::<Vec<NewsItem>, _, _>(
            DataKind::LatestNews,
            key.clone(),
            false,
            || async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Err(FeedError::RemoteUnavailable("backend down".into()))
            },
        );

        let second = svc.fetch_through::<Vec<NewsItem>, _, _>(
            DataKind::LatestNews,
            key.clone(),
            false,
            || async { Ok(items("never")) },
        );

        let (a, b) = tokio::join!(first, second);
        assert!(matches!(a, Err(FeedError::NoCachedFallback { .. })));
        assert!(matches!(b, Err(FeedError::NoCachedFallback { .. })));
    }

    #[tokio::test]
    async fn cache_query_operations_reflect_the_store() {
        let svc = service();
        let key = CacheKey::root(DataKind::LatestNews);

        assert!(!svc.is_cached(DataKind::LatestNews, &[]).await);
        assert!(svc.cache_age(DataKind::LatestNews, &[]).await.is_none());

        svc.fetch_through(DataKind::LatestNews, key, false, || async { Ok(items("a")) })
            .await
            .unwrap();

        assert!(svc.is_cached(DataKind::LatestNews, &[]).await);
        let age = svc.cache_age(DataKind::LatestNews, &[]).await.unwrap();
        assert!(age < Duration::from_secs(1));
        assert!(!svc.is_cached(DataKind::LatestNews, &[("category", "ai")]).await);
    }

    #[tokio::test]
    async fn clear_cache_resets_counters_and_entries() {
        let svc = service();
        let key = CacheKey::root(DataKind::LatestNews);

        svc.fetch_through(DataKind::LatestNews, key.clone(), false, || async {
            Ok(items("a"))
        })
        .await
        .unwrap();
        svc.fetch_through(DataKind::LatestNews, key, false, || async { Ok(items("b")) })
            .await
            .unwrap();

        let before = svc.cache_stats().await;
        assert!(before.hit_count > 0 || before.miss_count > 0);

        svc.clear_cache().await;
        let after = svc.cache_stats().await;
        assert_eq!(after.size, 0);
        assert_eq!(after.hit_count, 0);
        assert_eq!(after.miss_count, 0);
        assert!(!svc.is_cached(DataKind::LatestNews, &[]).await);
    }

    #[tokio::test]
    async fn mismatched_payload_shape_is_a_cache_error() {
        let svc = service();
        let key = CacheKey::root(DataKind::FeedStats);
        svc.store
            .set(key.clone(), FeedPayload::News(items("a")), Duration::from_secs(60))
            .await;

        let result: Result<FeedStats, _> = svc
            .fetch_through(DataKind::FeedStats, key, false, || async {
                Ok(FeedStats::default())
            })
            .await;
        assert!(matches!(result, Err(FeedError::Cache(_))));
    }

    #[tokio::test]
    async fn cancelled_leader_does_not_wedge_the_key() {
        let svc = service();
        let key = CacheKey::root(DataKind::LatestNews);
        let calls = Arc::new(AtomicUsize::new(0));

        // Give up on the first call mid-fetch. The fetch keeps running
        // in the background and must still release the in-flight slot.
        let c = calls.clone();
        let abandoned = svc.fetch_through(DataKind::LatestNews, key.clone(), false, move || async move {
            c.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(80)).await;
            Ok(items("led"))
        });
        assert!(tokio::time::timeout(Duration::from_millis(20), abandoned).await.is_err());

        let c = calls.clone();
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            svc.fetch_through(DataKind::LatestNews, key, false, move || async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(items("later"))
            }),
        )
        .await
        .expect("fetch must complete after the first caller was dropped")
        .unwrap();

        // The abandoned leader's result landed in the cache and its one
        // fetch served both calls.
        assert_eq!(result[0].id, "led");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
