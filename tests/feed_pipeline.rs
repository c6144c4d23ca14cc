//! End-to-end tests for the feed pipeline: push merges feeding
//! fetch-through reads, stale fallback during a backend outage, and
//! persistence across restarts.

use newswire::{
    CacheKey, Config, ConnectionState, DataKind, FeedContext, FeedError, FeedPayload,
    FeedSnapshot, LiveEvent, NewsItem, TrendingTopic, UpdateMerger,
};
use std::time::Duration;

// == Helper Functions ==

// Nothing listens on this port, so every remote call fails fast.
const DEAD_BACKEND: &str = "http://127.0.0.1:1";

fn dead_backend_config() -> Config {
    let mut config = Config::default();
    config.feed.base_url = DEAD_BACKEND.to_string();
    config.feed.push_url = format!("{}/api/news/stream", DEAD_BACKEND);
    config
}

fn news(id: &str) -> NewsItem {
    NewsItem {
        id: id.into(),
        title: format!("title {}", id),
        ..Default::default()
    }
}

fn push_merger(ctx: &FeedContext) -> UpdateMerger {
    UpdateMerger::new(
        ctx.store.clone(),
        ctx.config.cache.clone(),
        ctx.metrics.clone(),
    )
}

// == Push Merge + Fetch-Through ==

#[tokio::test]
async fn pushed_update_is_served_without_touching_the_backend() {
    let ctx = FeedContext::initialize(dead_backend_config()).await;

    let snapshot = FeedSnapshot {
        latest_news: Some(vec![news("pushed")]),
        ..Default::default()
    };
    push_merger(&ctx).apply(&snapshot).await;

    // The backend is dead, so this only succeeds as a cache hit.
    let items = ctx.service.latest_news(None, false).await.unwrap();
    assert_eq!(items[0].id, "pushed");

    assert!(ctx.service.is_cached(DataKind::LatestNews, &[]).await);
    assert!(ctx.service.cache_age(DataKind::LatestNews, &[]).await.is_some());

    let stats = ctx.service.cache_stats().await;
    assert_eq!(stats.hit_count, 1);
    assert_eq!(stats.miss_count, 0);

    ctx.shutdown().await;
}

#[tokio::test]
async fn pushed_update_does_not_satisfy_parameterized_views() {
    let ctx = FeedContext::initialize(dead_backend_config()).await;

    let snapshot = FeedSnapshot {
        latest_news: Some(vec![news("pushed")]),
        ..Default::default()
    };
    push_merger(&ctx).apply(&snapshot).await;

    // A category-filtered view has its own key and stays a miss.
    let result = ctx.service.latest_news(Some("technology"), false).await;
    assert!(matches!(result, Err(FeedError::NoCachedFallback { .. })));

    ctx.shutdown().await;
}

// == Stale Fallback ==

#[tokio::test]
async fn stale_entry_survives_a_backend_outage() {
    let ctx = FeedContext::initialize(dead_backend_config()).await;

    ctx.store
        .set(
            CacheKey::root(DataKind::TrendingTopics),
            FeedPayload::Topics(vec![TrendingTopic {
                id: "old".into(),
                keyword: "resilience".into(),
                ..Default::default()
            }]),
            Duration::from_millis(40),
        )
        .await;
    tokio::time::sleep(Duration::from_millis(80)).await;

    let topics = ctx.service.trending_topics(None, false).await.unwrap();
    assert_eq!(topics[0].id, "old");

    ctx.shutdown().await;
}

#[tokio::test]
async fn cold_miss_during_an_outage_is_an_error() {
    let ctx = FeedContext::initialize(dead_backend_config()).await;

    let err = ctx.service.latest_news(None, false).await.unwrap_err();
    match err {
        FeedError::NoCachedFallback { source, .. } => {
            assert!(source.is_remote());
        }
        other => panic!("expected NoCachedFallback, got {other}"),
    }

    ctx.shutdown().await;
}

#[tokio::test]
async fn forced_refresh_failure_falls_back_to_cached_data() {
    let ctx = FeedContext::initialize(dead_backend_config()).await;

    ctx.store
        .set(
            CacheKey::root(DataKind::LatestNews),
            FeedPayload::News(vec![news("fresh")]),
            Duration::from_secs(60),
        )
        .await;

    let items = ctx.service.latest_news(None, true).await.unwrap();
    assert_eq!(items[0].id, "fresh");

    // The forced bypass still counts as a miss.
    let stats = ctx.service.cache_stats().await;
    assert_eq!(stats.miss_count, 1);

    ctx.shutdown().await;
}

// == Persistence ==

#[tokio::test]
async fn pushed_data_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = dead_backend_config();
    config.cache.persist_dir = Some(dir.path().to_path_buf());

    let ctx = FeedContext::initialize(config.clone()).await;
    let snapshot = FeedSnapshot {
        latest_news: Some(vec![news("durable")]),
        ..Default::default()
    };
    push_merger(&ctx).apply(&snapshot).await;
    ctx.shutdown().await;

    let restarted = FeedContext::initialize(config).await;
    let items = restarted.service.latest_news(None, false).await.unwrap();
    assert_eq!(items[0].id, "durable");
    restarted.shutdown().await;
}

#[tokio::test]
async fn clearing_the_cache_clears_the_persisted_copy_too() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = dead_backend_config();
    config.cache.persist_dir = Some(dir.path().to_path_buf());

    let ctx = FeedContext::initialize(config.clone()).await;
    let snapshot = FeedSnapshot {
        latest_news: Some(vec![news("doomed")]),
        ..Default::default()
    };
    push_merger(&ctx).apply(&snapshot).await;
    ctx.service.clear_cache().await;
    ctx.shutdown().await;

    let restarted = FeedContext::initialize(config).await;
    assert!(restarted.store.is_empty().await);
    let stats = restarted.service.cache_stats().await;
    assert_eq!(stats.hit_count, 0);
    assert_eq!(stats.miss_count, 0);
    restarted.shutdown().await;
}

// == Live Channel ==

#[tokio::test]
async fn live_channel_gives_up_against_a_dead_endpoint() {
    let mut config = dead_backend_config();
    config.live.base_delay = Duration::from_millis(5);
    config.live.max_delay = Duration::from_millis(20);
    config.live.max_attempts = 2;

    let ctx = FeedContext::initialize(config).await;
    let mut events = ctx.live.subscribe();
    ctx.live.connect().await;

    let mut gave_up = None;
    loop {
        match tokio::time::timeout(Duration::from_secs(5), events.recv()).await {
            Ok(Ok(LiveEvent::GaveUp { attempts })) => {
                gave_up = Some(attempts);
                break;
            }
            Ok(Ok(_)) => {}
            Ok(Err(_)) | Err(_) => break,
        }
    }

    assert_eq!(gave_up, Some(2));
    assert_eq!(ctx.live.state(), ConnectionState::Disconnected);

    ctx.shutdown().await;
}
