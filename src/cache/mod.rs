//! Cache module for newswire.
//!
//! This module provides the caching infrastructure:
//! - Deterministic cache keys over (kind, parameters)
//! - A TTL store that retains stale entries for degraded fallback
//! - A cancellable periodic sweeper
//! - Two-slot disk persistence with integrity checking

pub mod entry;
pub mod key;
pub mod persistence;
pub mod store;
pub mod sweeper;

pub use entry::CacheEntry;
pub use key::{CacheKey, DataKind};
pub use persistence::{load_cache, save_cache};
pub use store::{CacheMetadata, CacheStats, TtlStore};
pub use sweeper::Sweeper;
