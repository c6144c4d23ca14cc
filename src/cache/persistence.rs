//! Disk persistence for the feed cache.
//!
//! The cache occupies two string-valued slots under one directory: a
//! checksummed entries envelope and a small metadata document. Writes are
//! atomic (temp file + rename); loads validate integrity and drop entries
//! that went stale while on disk.

use crate::cache::entry::CacheEntry;
use crate::cache::store::{CacheMetadata, TtlStore};
use crate::error::FeedError;
use crate::feed::model::FeedPayload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::fs;
use tracing::{debug, warn};

/// Version of the on-disk entries format
const SLOT_VERSION: u32 = 1;

/// Slot file names under the persistence directory
pub const ENTRIES_SLOT: &str = "entries.json";
pub const METADATA_SLOT: &str = "metadata.json";

/// Entries slot format with integrity check
#[derive(Serialize, Deserialize)]
struct EntriesSlot {
    /// Schema version for forward compatibility
    version: u32,
    /// When this slot was written
    saved_at: DateTime<Utc>,
    /// SHA256 checksum of the serialized entry list
    checksum: String,
    /// Entry count (quick validation without walking the list)
    entry_count: usize,
    /// The cached entries, stale ones included
    entries: Vec<CacheEntry<FeedPayload>>,
}

impl EntriesSlot {
    fn new(entries: Vec<CacheEntry<FeedPayload>>) -> Result<Self, FeedError> {
        let entry_count = entries.len();

        let entry_bytes = serde_json::to_vec(&entries)
            .map_err(|e| FeedError::PersistenceWrite(format!("Failed to serialize entries: {}", e)))?;

        Ok(Self {
            version: SLOT_VERSION,
            saved_at: Utc::now(),
            checksum: compute_sha256_hex(&entry_bytes),
            entry_count,
            entries,
        })
    }

    fn validate(&self) -> Result<(), FeedError> {
        if self.version > SLOT_VERSION {
            return Err(FeedError::PersistenceRead(format!(
                "Slot version {} is newer than supported version {}",
                self.version, SLOT_VERSION
            )));
        }

        if self.entries.len() != self.entry_count {
            return Err(FeedError::PersistenceRead(format!(
                "Entry count mismatch: expected {}, got {}",
                self.entry_count,
                self.entries.len()
            )));
        }

        let entry_bytes = serde_json::to_vec(&self.entries)
            .map_err(|e| FeedError::PersistenceRead(format!("Failed to serialize entries: {}", e)))?;

        if compute_sha256_hex(&entry_bytes) != self.checksum {
            return Err(FeedError::PersistenceRead(
                "Checksum mismatch - slot may be corrupt".to_string(),
            ));
        }

        Ok(())
    }
}

/// Compute SHA256 hash and return as hex string
fn compute_sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Atomic slot write: temp file in the same directory, then rename.
async fn write_slot(dir: &Path, name: &str, bytes: &[u8]) -> Result<(), FeedError> {
    fs::create_dir_all(dir)
        .await
        .map_err(|e| FeedError::PersistenceWrite(format!("Failed to create cache directory: {}", e)))?;

    let path = dir.join(name);
    let temp_path = path.with_extension("tmp");

    fs::write(&temp_path, bytes)
        .await
        .map_err(|e| FeedError::PersistenceWrite(format!("Failed to write temp slot file: {}", e)))?;

    fs::rename(&temp_path, &path)
        .await
        .map_err(|e| FeedError::PersistenceWrite(format!("Failed to rename slot file: {}", e)))?;

    Ok(())
}

/// Save the store into both slots.
///
/// Stale entries are saved as-is; the load side decides what survives.
/// Callers treat failure as non-fatal and keep serving from memory.
pub async fn save_cache(store: &TtlStore, dir: &Path) -> Result<(), FeedError> {
    let (entries, meta) = store.export().await;
    let slot = EntriesSlot::new(entries)?;

    let entry_bytes = serde_json::to_vec(&slot)
        .map_err(|e| FeedError::PersistenceWrite(format!("Failed to serialize slot: {}", e)))?;
    let meta_bytes = serde_json::to_vec(&meta)
        .map_err(|e| FeedError::PersistenceWrite(format!("Failed to serialize metadata: {}", e)))?;

    write_slot(dir, ENTRIES_SLOT, &entry_bytes).await?;
    write_slot(dir, METADATA_SLOT, &meta_bytes).await?;

    debug!(
        dir = %dir.display(),
        entries = slot.entry_count,
        bytes = entry_bytes.len(),
        checksum = %slot.checksum,
        "Cache persisted"
    );

    Ok(())
}

/// Load both slots, dropping entries that are already stale.
///
/// Stale-on-disk entries are never resurrected, not even as fallbacks. A
/// corrupt or missing metadata slot degrades to fresh metadata; a corrupt
/// entries slot fails the whole load, and the caller starts cold.
pub async fn load_cache(dir: &Path) -> Result<(Vec<CacheEntry<FeedPayload>>, CacheMetadata), FeedError> {
    let entries_path = dir.join(ENTRIES_SLOT);
    let bytes = fs::read(&entries_path)
        .await
        .map_err(|e| FeedError::PersistenceRead(format!("Failed to read entries slot: {}", e)))?;

    let slot: EntriesSlot = serde_json::from_slice(&bytes)
        .map_err(|e| FeedError::PersistenceRead(format!("Failed to deserialize entries slot: {}", e)))?;

    slot.validate()?;

    let total = slot.entries.len();
    let entries: Vec<CacheEntry<FeedPayload>> = slot
        .entries
        .into_iter()
        .filter(|entry| entry.is_valid())
        .collect();

    debug!(
        dir = %dir.display(),
        loaded = entries.len(),
        dropped_stale = total - entries.len(),
        saved_at = %slot.saved_at,
        "Loaded entries slot"
    );

    let meta = match fs::read(dir.join(METADATA_SLOT)).await {
        Ok(bytes) => match serde_json::from_slice::<CacheMetadata>(&bytes) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(error = %e, "Metadata slot unreadable, starting with fresh counters");
                CacheMetadata::default()
            }
        },
        Err(e) => {
            warn!(error = %e, "Metadata slot missing, starting with fresh counters");
            CacheMetadata::default()
        }
    };

    Ok((entries, meta))
}

/// True when the entries slot exists on disk.
pub async fn slot_files_exist(dir: &Path) -> bool {
    fs::metadata(dir.join(ENTRIES_SLOT)).await.is_ok()
}
