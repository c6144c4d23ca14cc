use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Deserialize a timestamp that may be RFC3339 or a naive ISO string
/// (the backend emits `datetime.now().isoformat()` without a zone).
/// Naive values are taken as UTC.
mod flexible_time {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt = Option::<String>::deserialize(deserializer)?;
        match opt {
            None => Ok(None),
            Some(raw) => {
                if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
                    return Ok(Some(dt.with_timezone(&Utc)));
                }
                NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
                    .map(|naive| Some(naive.and_utc()))
                    .map_err(serde::de::Error::custom)
            }
        }
    }

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(dt) => serializer.serialize_some(&dt.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct NewsItem {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub source: Option<String>,
    #[serde(rename = "publishedAt", with = "flexible_time", default)]
    pub published_at: Option<DateTime<Utc>>,
    pub url: Option<String>,
    #[serde(rename = "imageUrl")]
    pub image_url: Option<String>,
    #[serde(rename = "isBreaking", default)]
    pub is_breaking: bool,
    #[serde(rename = "viralityScore")]
    pub virality_score: Option<f64>,
    #[serde(default)]
    pub hashtags: Vec<String>,
    pub sentiment: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct TrendingTopic {
    pub id: String,
    pub keyword: String,
    pub trend: Option<String>,
    pub volume: Option<u64>,
    #[serde(rename = "changeRate")]
    pub change_rate: Option<f64>,
    #[serde(default)]
    pub platforms: Vec<String>,
    pub timeframe: Option<String>,
    pub category: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct SocialHook {
    pub id: String,
    pub platform: String,
    #[serde(rename = "hookType")]
    pub hook_type: Option<String>,
    pub content: Option<String>,
    #[serde(rename = "engagementPotential")]
    pub engagement_potential: Option<f64>,
    #[serde(rename = "trendingHashtags", default)]
    pub trending_hashtags: Vec<String>,
    #[serde(rename = "optimalPostTime", with = "flexible_time", default)]
    pub optimal_post_time: Option<DateTime<Utc>>,
    pub difficulty: Option<String>,
}

/// Backend statistics object. Served bare (no envelope) and snake_case,
/// unlike the item endpoints.
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct FeedStats {
    #[serde(default)]
    pub active_sessions: u64,
    #[serde(default)]
    pub total_articles_processed: u64,
    #[serde(default)]
    pub active_monitors: u64,
    #[serde(default)]
    pub cache_hit_rate: f64,
    #[serde(default)]
    pub average_processing_time: f64,
    #[serde(with = "flexible_time", default)]
    pub last_update: Option<DateTime<Utc>>,
}

/// The typed store value. One variant per data kind, so a cache read can
/// never hand back a shape the caller did not ask for.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "kind", content = "items")]
pub enum FeedPayload {
    #[serde(rename = "news")]
    News(Vec<NewsItem>),
    #[serde(rename = "topics")]
    Topics(Vec<TrendingTopic>),
    #[serde(rename = "hooks")]
    Hooks(Vec<SocialHook>),
    #[serde(rename = "stats")]
    Stats(FeedStats),
}

impl FeedPayload {
    /// Item count for log lines; a stats object counts as one.
    pub fn item_count(&self) -> usize {
        match self {
            FeedPayload::News(items) => items.len(),
            FeedPayload::Topics(items) => items.len(),
            FeedPayload::Hooks(items) => items.len(),
            FeedPayload::Stats(_) => 1,
        }
    }
}

/// Conversion between concrete feed types and the store's payload enum.
pub trait FeedData: Clone + Sized {
    fn into_payload(self) -> FeedPayload;
    fn from_payload(payload: FeedPayload) -> Option<Self>;
}

impl FeedData for Vec<NewsItem> {
    fn into_payload(self) -> FeedPayload {
        FeedPayload::News(self)
    }

    fn from_payload(payload: FeedPayload) -> Option<Self> {
        match payload {
            FeedPayload::News(items) => Some(items),
            _ => None,
        }
    }
}

impl FeedData for Vec<TrendingTopic> {
    fn into_payload(self) -> FeedPayload {
        FeedPayload::Topics(self)
    }

    fn from_payload(payload: FeedPayload) -> Option<Self> {
        match payload {
            FeedPayload::Topics(items) => Some(items),
            _ => None,
        }
    }
}

impl FeedData for Vec<SocialHook> {
    fn into_payload(self) -> FeedPayload {
        FeedPayload::Hooks(self)
    }

    fn from_payload(payload: FeedPayload) -> Option<Self> {
        match payload {
            FeedPayload::Hooks(items) => Some(items),
            _ => None,
        }
    }
}

impl FeedData for FeedStats {
    fn into_payload(self) -> FeedPayload {
        FeedPayload::Stats(self)
    }

    fn from_payload(payload: FeedPayload) -> Option<Self> {
        match payload {
            FeedPayload::Stats(stats) => Some(stats),
            _ => None,
        }
    }
}

/// Per-kind item lists carried by push messages. Absent kinds are left
/// untouched by the merger.
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct FeedSnapshot {
    #[serde(default)]
    pub latest_news: Option<Vec<NewsItem>>,
    #[serde(default)]
    pub trending_topics: Option<Vec<TrendingTopic>>,
    #[serde(default)]
    pub social_hooks: Option<Vec<SocialHook>>,
}

impl FeedSnapshot {
    pub fn is_empty(&self) -> bool {
        self.latest_news.is_none() && self.trending_topics.is_none() && self.social_hooks.is_none()
    }

    /// Compact "kind=count" summary for log lines.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if let Some(items) = &self.latest_news {
            parts.push(format!("latest_news={}", items.len()));
        }
        if let Some(items) = &self.trending_topics {
            parts.push(format!("trending_topics={}", items.len()));
        }
        if let Some(items) = &self.social_hooks {
            parts.push(format!("social_hooks={}", items.len()));
        }
        if parts.is_empty() {
            "empty".to_string()
        } else {
            parts.join(" ")
        }
    }
}
