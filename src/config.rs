use crate::cache::key::DataKind;
use anyhow::{ensure, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Default per-kind TTLs in seconds. Stats go stale fast; trending moves
/// slowly.
const DEFAULT_TTL_LATEST_SECS: u64 = 300;
const DEFAULT_TTL_TRENDING_SECS: u64 = 1800;
const DEFAULT_TTL_HOOKS_SECS: u64 = 900;
const DEFAULT_TTL_STATS_SECS: u64 = 60;
const DEFAULT_TTL_SEARCH_SECS: u64 = 600;

/// How long a stale entry stays useful as a fallback. Must exceed every
/// TTL or sweeps would race fresh entries.
const DEFAULT_GRACE_SECS: u64 = 3600;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PUSH_BASE_DELAY_MS: u64 = 1000;
const DEFAULT_PUSH_MAX_DELAY_MS: u64 = 30_000;
const DEFAULT_PUSH_MAX_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub base_url: String,
    pub push_url: String,
    pub request_timeout: Duration,
    /// Backend-side parameter defaults. Applied at the HTTP layer only,
    /// never folded into cache keys.
    pub default_country: String,
    pub default_language: String,
    pub default_timeframe: String,
    pub page_size: u32,
    pub trending_limit: u32,
    pub hooks_limit: u32,
    pub search_limit: u32,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            push_url: default_push_url(DEFAULT_BASE_URL),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            default_country: "us".to_string(),
            default_language: "en".to_string(),
            default_timeframe: "24h".to_string(),
            page_size: 50,
            trending_limit: 20,
            hooks_limit: 10,
            search_limit: 20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl_latest: Duration,
    pub ttl_trending: Duration,
    pub ttl_hooks: Duration,
    pub ttl_stats: Duration,
    pub ttl_search: Duration,
    pub grace_window: Duration,
    pub sweep_interval: Duration,
    /// Persistence directory; persistence is disabled when unset.
    pub persist_dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_latest: Duration::from_secs(DEFAULT_TTL_LATEST_SECS),
            ttl_trending: Duration::from_secs(DEFAULT_TTL_TRENDING_SECS),
            ttl_hooks: Duration::from_secs(DEFAULT_TTL_HOOKS_SECS),
            ttl_stats: Duration::from_secs(DEFAULT_TTL_STATS_SECS),
            ttl_search: Duration::from_secs(DEFAULT_TTL_SEARCH_SECS),
            grace_window: Duration::from_secs(DEFAULT_GRACE_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            persist_dir: None,
        }
    }
}

impl CacheConfig {
    pub fn ttl_for(&self, kind: DataKind) -> Duration {
        match kind {
            DataKind::LatestNews => self.ttl_latest,
            DataKind::TrendingTopics => self.ttl_trending,
            DataKind::SocialHooks => self.ttl_hooks,
            DataKind::FeedStats => self.ttl_stats,
            DataKind::Search => self.ttl_search,
        }
    }

    pub fn largest_ttl(&self) -> Duration {
        self.ttl_latest
            .max(self.ttl_trending)
            .max(self.ttl_hooks)
            .max(self.ttl_stats)
            .max(self.ttl_search)
    }
}

#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(DEFAULT_PUSH_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_PUSH_MAX_DELAY_MS),
            max_attempts: DEFAULT_PUSH_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub feed: FeedConfig,
    pub cache: CacheConfig,
    pub live: LiveConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let base_url =
            env::var("NEWSWIRE_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let push_url =
            env::var("NEWSWIRE_PUSH_URL").unwrap_or_else(|_| default_push_url(&base_url));

        let config = Self {
            feed: FeedConfig {
                base_url,
                push_url,
                request_timeout: Duration::from_secs(env_u64(
                    "NEWSWIRE_REQUEST_TIMEOUT",
                    DEFAULT_REQUEST_TIMEOUT_SECS,
                )),
                ..FeedConfig::default()
            },
            cache: CacheConfig {
                ttl_latest: Duration::from_secs(env_u64(
                    "NEWSWIRE_TTL_LATEST",
                    DEFAULT_TTL_LATEST_SECS,
                )),
                ttl_trending: Duration::from_secs(env_u64(
                    "NEWSWIRE_TTL_TRENDING",
                    DEFAULT_TTL_TRENDING_SECS,
                )),
                ttl_hooks: Duration::from_secs(env_u64(
                    "NEWSWIRE_TTL_HOOKS",
                    DEFAULT_TTL_HOOKS_SECS,
                )),
                ttl_stats: Duration::from_secs(env_u64(
                    "NEWSWIRE_TTL_STATS",
                    DEFAULT_TTL_STATS_SECS,
                )),
                ttl_search: Duration::from_secs(env_u64(
                    "NEWSWIRE_TTL_SEARCH",
                    DEFAULT_TTL_SEARCH_SECS,
                )),
                grace_window: Duration::from_secs(env_u64(
                    "NEWSWIRE_GRACE_WINDOW",
                    DEFAULT_GRACE_SECS,
                )),
                sweep_interval: Duration::from_secs(env_u64(
                    "NEWSWIRE_SWEEP_INTERVAL",
                    DEFAULT_SWEEP_INTERVAL_SECS,
                )),
                persist_dir: env::var("NEWSWIRE_CACHE_DIR").ok().map(PathBuf::from),
            },
            live: LiveConfig {
                base_delay: Duration::from_millis(env_u64(
                    "NEWSWIRE_PUSH_BASE_DELAY_MS",
                    DEFAULT_PUSH_BASE_DELAY_MS,
                )),
                max_delay: Duration::from_millis(env_u64(
                    "NEWSWIRE_PUSH_MAX_DELAY_MS",
                    DEFAULT_PUSH_MAX_DELAY_MS,
                )),
                max_attempts: env_u64("NEWSWIRE_PUSH_MAX_ATTEMPTS", DEFAULT_PUSH_MAX_ATTEMPTS as u64)
                    as u32,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        // A zero TTL would make every write expire on arrival; the
        // store rejects it outright, so catch it here.
        for (kind, ttl) in [
            ("latest", self.cache.ttl_latest),
            ("trending", self.cache.ttl_trending),
            ("hooks", self.cache.ttl_hooks),
            ("stats", self.cache.ttl_stats),
            ("search", self.cache.ttl_search),
        ] {
            ensure!(!ttl.is_zero(), "{} TTL must be positive", kind);
        }
        ensure!(
            !self.cache.sweep_interval.is_zero(),
            "sweep interval must be positive"
        );
        ensure!(
            self.cache.grace_window > self.cache.largest_ttl(),
            "grace window ({}s) must exceed the largest TTL ({}s)",
            self.cache.grace_window.as_secs(),
            self.cache.largest_ttl().as_secs()
        );
        ensure!(
            self.live.base_delay <= self.live.max_delay,
            "push base delay must not exceed max delay"
        );
        ensure!(self.live.max_attempts > 0, "push max attempts must be positive");
        Ok(())
    }
}

/// The push endpoint served next to the REST API.
pub fn default_push_url(base_url: &str) -> String {
    format!("{}/api/news/stream", base_url.trim_end_matches('/'))
}

/// Parse an env var as u64, falling back to the default on absence or
/// garbage.
fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}
