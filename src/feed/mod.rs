//! Feed data: wire models, the REST client, and the fetch-through
//! service that callers actually use.

pub mod api;
pub mod model;
pub mod service;

pub use api::FeedApi;
pub use model::{FeedData, FeedPayload, FeedSnapshot, FeedStats, NewsItem, SocialHook, TrendingTopic};
pub use service::FeedService;
