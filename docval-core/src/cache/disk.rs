//! Persistent cache tier
//!
//! One JSON file per fingerprint. Any file that cannot be read or decoded
//! is a miss and is removed.

use super::{CacheEntry, CacheKey};
use chrono::Utc;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct DiskTier {
    dir: PathBuf,
}

impl DiskTier {
    /// Open (and create if needed) a cache directory
    pub async fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.file_stem()))
    }

    pub async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let path = self.path_for(key);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unreadable cache file");
                self.discard(&path).await;
                return None;
            }
        };

        let entry: CacheEntry = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt cache file, discarding");
                self.discard(&path).await;
                return None;
            }
        };

        if entry.key != *key || entry.expires_at <= Utc::now() {
            debug!(key = %key, "Disk entry stale");
            self.discard(&path).await;
            return None;
        }
        Some(entry)
    }

    /// Write via a temporary file so readers never see a partial entry
    pub async fn put(&self, entry: &CacheEntry) -> io::Result<()> {
        let path = self.path_for(&entry.key);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec(entry).map_err(io::Error::other)?;
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, &path).await
    }

    pub async fn remove(&self, key: &CacheKey) {
        self.discard(&self.path_for(key)).await;
    }

    pub async fn clear(&self) -> io::Result<usize> {
        let mut removed = 0;
        let mut dir = fs::read_dir(&self.dir).await?;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                self.discard(&path).await;
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn discard(&self, path: &Path) {
        if let Err(e) = fs::remove_file(path).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "Failed to remove cache file");
            }
        }
    }
}
