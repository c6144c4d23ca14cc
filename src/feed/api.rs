use crate::config::FeedConfig;
use crate::error::FeedError;
use crate::feed::model::{FeedStats, NewsItem, SocialHook, TrendingTopic};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 100;

/// REST client for the feed backend.
///
/// Item endpoints answer with a `{status, data}` envelope; the stats
/// endpoint returns its object bare.
#[derive(Clone)]
pub struct FeedApi {
    client: Client,
    config: FeedConfig,
}

#[derive(Deserialize, Debug)]
struct ApiEnvelope<T> {
    status: String,
    data: T,
}

impl FeedApi {
    pub fn new(config: FeedConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(config.request_timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            config,
        }
    }

    /// Execute an HTTP GET request with exponential backoff retry logic.
    /// Transport failures and 5xx retry; 4xx does not.
    async fn get_with_retry(
        &self,
        path: &str,
        query_type: &str,
        params: &[(&str, &str)],
    ) -> Result<Value, FeedError> {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            let start = Instant::now();

            debug!(
                query_type = query_type,
                attempt = attempt + 1,
                url = %url,
                "Sending request to feed backend"
            );

            match self.client.get(&url).query(params).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let elapsed = start.elapsed();

                    if status.is_success() {
                        debug!(
                            query_type = query_type,
                            status = %status,
                            elapsed_ms = elapsed.as_millis() as u64,
                            "Request successful"
                        );
                        // A 2xx with an undecodable body is a broken
                        // response, not an outage.
                        let body: Value = resp.json().await.map_err(|e| {
                            FeedError::RemoteMalformed(format!("Invalid JSON body: {}", e))
                        })?;
                        return Ok(body);
                    } else if status.is_server_error() {
                        debug!(
                            query_type = query_type,
                            status = %status,
                            elapsed_ms = elapsed.as_millis() as u64,
                            "Server error, will retry"
                        );
                        last_error = Some(FeedError::RemoteUnavailable(format!("HTTP {}", status)));
                    } else {
                        debug!(
                            query_type = query_type,
                            status = %status,
                            elapsed_ms = elapsed.as_millis() as u64,
                            "Client error, not retrying"
                        );
                        return Err(FeedError::RemoteUnavailable(format!("HTTP {}", status)));
                    }
                }
                Err(e) => {
                    let elapsed = start.elapsed();
                    debug!(
                        query_type = query_type,
                        error = %e,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Request failed"
                    );
                    last_error = Some(FeedError::from(e));
                }
            }

            if attempt < MAX_RETRIES - 1 {
                let backoff = INITIAL_BACKOFF_MS * 2u64.pow(attempt);
                warn!(
                    query_type = query_type,
                    attempt = attempt + 1,
                    max_retries = MAX_RETRIES,
                    backoff_ms = backoff,
                    "Request failed, retrying"
                );
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
        }

        Err(last_error
            .unwrap_or_else(|| FeedError::RemoteUnavailable("Request failed after retries".into())))
    }

    #[instrument(skip(self), fields(query_type = "latest_news"))]
    pub async fn latest_news(&self, category: Option<&str>) -> Result<Vec<NewsItem>, FeedError> {
        let page_size = self.config.page_size.to_string();
        let mut params: Vec<(&str, &str)> = vec![
            ("country", self.config.default_country.as_str()),
            ("page_size", page_size.as_str()),
        ];
        if let Some(category) = category {
            params.push(("category", category));
        }

        let json = self.get_with_retry("/api/news/latest", "latest_news", &params).await?;
        parse_envelope(json)
    }

    #[instrument(skip(self), fields(query_type = "trending_topics"))]
    pub async fn trending_topics(
        &self,
        timeframe: Option<&str>,
    ) -> Result<Vec<TrendingTopic>, FeedError> {
        let limit = self.config.trending_limit.to_string();
        let timeframe = timeframe.unwrap_or(self.config.default_timeframe.as_str());
        let params: Vec<(&str, &str)> = vec![("timeframe", timeframe), ("limit", limit.as_str())];

        let json = self
            .get_with_retry("/api/news/trending", "trending_topics", &params)
            .await?;
        parse_envelope(json)
    }

    #[instrument(skip(self), fields(query_type = "social_hooks"))]
    pub async fn social_hooks(
        &self,
        platforms: Option<&[String]>,
    ) -> Result<Vec<SocialHook>, FeedError> {
        let limit = self.config.hooks_limit.to_string();
        let joined = platforms.map(|p| p.join(","));
        let mut params: Vec<(&str, &str)> = vec![("limit", limit.as_str())];
        if let Some(joined) = joined.as_deref() {
            params.push(("platforms", joined));
        }

        let json = self
            .get_with_retry("/api/news/social-hooks", "social_hooks", &params)
            .await?;
        parse_envelope(json)
    }

    #[instrument(skip(self), fields(query_type = "news_stats"))]
    pub async fn feed_stats(&self) -> Result<FeedStats, FeedError> {
        // Bare object, no envelope.
        let json = self.get_with_retry("/api/news/stats", "news_stats", &[]).await?;
        serde_json::from_value(json).map_err(FeedError::from)
    }

    #[instrument(skip(self), fields(query_type = "news_search"))]
    pub async fn search_news(
        &self,
        query: &str,
        category: Option<&str>,
    ) -> Result<Vec<NewsItem>, FeedError> {
        let limit = self.config.search_limit.to_string();
        let mut params: Vec<(&str, &str)> = vec![
            ("query", query),
            ("limit", limit.as_str()),
            ("country", self.config.default_country.as_str()),
            ("language", self.config.default_language.as_str()),
        ];
        if let Some(category) = category {
            params.push(("category", category));
        }

        let json = self.get_with_retry("/api/news/search", "news_search", &params).await?;
        parse_envelope(json)
    }
}

/// Unwrap the backend's `{status, data}` envelope.
fn parse_envelope<T: DeserializeOwned>(json: Value) -> Result<T, FeedError> {
    let envelope: ApiEnvelope<T> = serde_json::from_value(json)?;
    if envelope.status != "success" {
        return Err(FeedError::RemoteMalformed(format!(
            "Backend reported status {:?}",
            envelope.status
        )));
    }
    Ok(envelope.data)
}
