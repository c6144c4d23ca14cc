use md5::Digest;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The data kinds served by the feed backend.
///
/// Wire names double as cache-key prefixes and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    LatestNews,
    TrendingTopics,
    SocialHooks,
    FeedStats,
    Search,
}

impl DataKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::LatestNews => "latest_news",
            DataKind::TrendingTopics => "trending_topics",
            DataKind::SocialHooks => "social_hooks",
            DataKind::FeedStats => "news_stats",
            DataKind::Search => "news_search",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deterministic cache key for one (kind, parameter set) view.
///
/// Parameters are sorted by name before digesting, so the key is
/// independent of argument order. The stored form is
/// `<kind>:<md5 hex of "kind:k1=v1&k2=v2">`, which keeps log lines
/// readable while the digest bounds the key length.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn compute(kind: DataKind, params: &[(&str, &str)]) -> Self {
        let mut sorted: Vec<(&str, &str)> = params.to_vec();
        sorted.sort_unstable();

        let rendered = sorted
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");

        let mut hasher = md5::Md5::new();
        hasher.update(kind.as_str().as_bytes());
        hasher.update(b":");
        hasher.update(rendered.as_bytes());
        let digest = hex::encode(hasher.finalize());

        CacheKey(format!("{}:{}", kind.as_str(), digest))
    }

    /// The no-parameter view of a kind. Push-driven writes land here.
    pub fn root(kind: DataKind) -> Self {
        Self::compute(kind, &[])
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
