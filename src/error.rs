use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Remote unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Remote response malformed: {0}")]
    RemoteMalformed(String),

    #[error("No cached fallback for {key}: {source}")]
    NoCachedFallback {
        key: String,
        #[source]
        source: Box<FeedError>,
    },

    #[error("Persistence write failed: {0}")]
    PersistenceWrite(String),

    #[error("Persistence read failed: {0}")]
    PersistenceRead(String),

    #[error("Cache error: {0}")]
    Cache(String),
}

impl FeedError {
    /// Remote errors can be absorbed by a stale cache entry; everything
    /// else propagates.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            FeedError::RemoteUnavailable(_) | FeedError::RemoteMalformed(_)
        )
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        FeedError::RemoteUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::RemoteMalformed(err.to_string())
    }
}
