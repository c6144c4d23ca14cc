//! The live push channel: streaming client, typed messages, and the
//! merger that folds pushed data into the cache.

pub mod client;
pub mod merger;
pub mod message;

pub use client::{ConnectionState, LiveClient, LiveEvent, CLOSE_ABNORMAL, CLOSE_NORMAL};
pub use merger::UpdateMerger;
pub use message::{parse_push_frame, PushMessage};
