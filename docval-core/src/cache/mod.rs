//! Multi-tier response cache
//!
//! A memory tier for hot entries, optionally backed by a disk tier. Values
//! are opaque JSON. Cache failures never surface: a broken tier reads as a
//! miss and the caller recomputes.

pub mod disk;
pub mod key;
pub mod memory;

pub use disk::DiskTier;
pub use key::CacheKey;
pub use memory::MemoryTier;

use crate::background::BackgroundTask;
use crate::protocol::TaskType;
use crate::providers::TaskOutput;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default interval of the background expiry sweep
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Longest lifetime an entry is stored with; longer TTLs are clamped
pub const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// A stored result with its lifetime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub value: Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub hits: u64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl CacheEntry {
    pub fn new(key: CacheKey, value: Value, ttl: Duration) -> Self {
        let created_at = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Self {
            key,
            value,
            created_at,
            expires_at: created_at.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
            hits: 0,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Live entries in the memory tier
    pub total_entries: usize,
    /// Hits recorded on live memory entries
    pub total_hits: u64,
    pub misses: u64,
}

/// Time-to-live per task type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    pub parse_ttl: Duration,
    pub validate_ttl: Duration,
    pub interpret_ttl: Duration,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            parse_ttl: Duration::from_secs(24 * 60 * 60),
            validate_ttl: Duration::from_secs(60 * 60),
            interpret_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl CachePolicy {
    /// TTL for a task; `None` means the result is never cached
    pub fn ttl_for(&self, task: TaskType) -> Option<Duration> {
        match task {
            TaskType::ParseInstruction => Some(self.parse_ttl),
            TaskType::ValidateExpectation => Some(self.validate_ttl),
            TaskType::InterpretError => Some(self.interpret_ttl),
            TaskType::CompressContext => None,
        }
    }
}

/// Response cache shared by every caller
#[derive(Debug)]
pub struct ResponseCache {
    enabled: bool,
    memory: MemoryTier,
    disk: Option<DiskTier>,
    misses: AtomicU64,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseCache {
    /// Memory-only cache
    pub fn new() -> Self {
        Self {
            enabled: true,
            memory: MemoryTier::new(),
            disk: None,
            misses: AtomicU64::new(0),
        }
    }

    /// A cache that stores nothing and always misses
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new()
        }
    }

    pub fn with_disk(mut self, disk: DiskTier) -> Self {
        self.disk = Some(disk);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn get(&self, key: &CacheKey) -> Option<Value> {
        if !self.enabled {
            return None;
        }

        if let Some(value) = self.memory.get(key) {
            debug!(key = %key, tier = "memory", "Cache hit");
            return Some(value);
        }

        if let Some(disk) = &self.disk {
            if let Some(mut entry) = disk.get(key).await {
                if let Some(remaining) = memory::remaining_ttl(&entry) {
                    debug!(key = %key, tier = "disk", "Cache hit, promoting");
                    entry.hits += 1;
                    let value = entry.value.clone();
                    self.memory.insert(entry, remaining);
                    return Some(value);
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, "Cache miss");
        None
    }

    /// Store a value; overwrites unconditionally
    pub async fn set(&self, key: &CacheKey, value: Value, ttl: Duration) {
        if !self.enabled || ttl.is_zero() {
            return;
        }

        let ttl = ttl.min(MAX_TTL);
        let entry = CacheEntry::new(key.clone(), value, ttl);
        if let Some(disk) = &self.disk {
            if let Err(e) = disk.put(&entry).await {
                warn!(key = %key, error = %e, "Failed to persist cache entry");
            }
        }
        self.memory.insert(entry, ttl);
    }

    /// Typed lookup of a task result
    ///
    /// An entry that no longer decodes as a result of `task` is dropped and
    /// reads as a miss.
    pub async fn get_output(&self, key: &CacheKey, task: TaskType) -> Option<TaskOutput> {
        let value = self.get(key).await?;
        match serde_json::from_value::<TaskOutput>(value) {
            Ok(output) if output.task_type() == task => Some(output),
            Ok(output) => {
                warn!(
                    key = %key,
                    expected = %task,
                    found = %output.task_type(),
                    "Cached result has the wrong task, discarding"
                );
                self.delete(key).await;
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Undecodable cached result, discarding");
                self.delete(key).await;
                None
            }
        }
    }

    pub async fn set_output(&self, key: &CacheKey, output: &TaskOutput, ttl: Duration) {
        match serde_json::to_value(output) {
            Ok(value) => self.set(key, value, ttl).await,
            Err(e) => warn!(key = %key, error = %e, "Failed to encode result for caching"),
        }
    }

    pub async fn delete(&self, key: &CacheKey) {
        self.memory.remove(key);
        if let Some(disk) = &self.disk {
            disk.remove(key).await;
        }
    }

    pub async fn clear(&self) {
        self.memory.clear();
        if let Some(disk) = &self.disk {
            if let Err(e) = disk.clear().await {
                warn!(dir = %disk.dir().display(), error = %e, "Failed to clear disk cache");
            }
        }
        info!("Cache cleared");
    }

    pub fn stats(&self) -> CacheStats {
        let (total_entries, total_hits) = self.memory.counts();
        CacheStats {
            total_entries,
            total_hits,
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Remove expired memory entries
    pub fn purge_expired(&self) -> usize {
        let removed = self.memory.purge_expired();
        if removed > 0 {
            debug!(removed, "Swept expired cache entries");
        }
        removed
    }

    /// Start the background expiry sweep
    pub fn spawn_janitor(self: &Arc<Self>, interval: Duration) -> BackgroundTask {
        BackgroundTask::spawn("cache janitor", self, interval, |cache| async move {
            cache.purge_expired();
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_set_get_and_expiry() {
        let cache = ResponseCache::new();
        let key = CacheKey::from("k");

        cache.set(&key, json!("v"), Duration::from_secs(5)).await;
        assert_eq!(cache.get(&key).await, Some(json!("v")));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.get(&key).await, None);
    }

    #[tokio::test]
    async fn test_huge_ttl_is_clamped() {
        let cache = ResponseCache::new();
        let key = CacheKey::from("k");
        cache.set(&key, json!("v"), Duration::from_secs(u64::MAX)).await;
        assert_eq!(cache.get(&key).await, Some(json!("v")));

        let entry = cache.memory.entry(&key).unwrap();
        let lifetime = (entry.expires_at - entry.created_at).to_std().unwrap();
        assert!(lifetime <= MAX_TTL);
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let cache = ResponseCache::new();
        let key = CacheKey::from("k");
        cache.set(&key, json!(1), Duration::from_secs(60)).await;
        cache.set(&key, json!(2), Duration::from_secs(60)).await;
        assert_eq!(cache.get(&key).await, Some(json!(2)));
    }

    #[tokio::test]
    async fn test_stats_and_delete() {
        let cache = ResponseCache::new();
        let key = CacheKey::from("k");
        assert!(cache.get(&key).await.is_none());
        cache.set(&key, json!(1), Duration::from_secs(60)).await;
        cache.get(&key).await;
        cache.get(&key).await;

        assert_eq!(
            cache.stats(),
            CacheStats {
                total_entries: 1,
                total_hits: 2,
                misses: 1
            }
        );

        cache.delete(&key).await;
        assert!(cache.get(&key).await.is_none());
        assert_eq!(cache.stats().total_entries, 0);
    }

    #[tokio::test]
    async fn test_disabled_cache_is_noop() {
        let cache = ResponseCache::disabled();
        let key = CacheKey::from("k");
        cache.set(&key, json!(1), Duration::from_secs(60)).await;
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_disk_hit_promotes_to_memory() {
        let dir = tempfile::tempdir().unwrap();
        let key = CacheKey::from("parse_instruction:p");

        let writer = ResponseCache::new().with_disk(DiskTier::open(dir.path()).await.unwrap());
        writer.set(&key, json!({"x": 1}), Duration::from_secs(60)).await;

        // A fresh process sees only the disk tier
        let reader = ResponseCache::new().with_disk(DiskTier::open(dir.path()).await.unwrap());
        assert_eq!(reader.stats().total_entries, 0);
        assert_eq!(reader.get(&key).await, Some(json!({"x": 1})));
        assert_eq!(reader.stats().total_entries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_janitor_sweeps_and_shuts_down() {
        let cache = Arc::new(ResponseCache::new());
        let key = CacheKey::from("k");
        cache.set(&key, json!(1), Duration::from_secs(1)).await;

        let janitor = cache.spawn_janitor(Duration::from_secs(10));
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(cache.memory.is_empty());

        janitor.shutdown().await;
    }

    #[tokio::test]
    async fn test_typed_lookup_rejects_other_task() {
        use crate::protocol::ValidationResult;

        let cache = ResponseCache::new();
        let key = CacheKey::from("k");
        let output = TaskOutput::Validation(ValidationResult::new(true, 0.9));
        cache.set_output(&key, &output, Duration::from_secs(60)).await;

        assert_eq!(
            cache.get_output(&key, TaskType::ValidateExpectation).await,
            Some(output)
        );
        assert!(cache.get_output(&key, TaskType::ParseInstruction).await.is_none());
        // Mismatched entry was dropped
        assert!(cache.get(&key).await.is_none());
    }

    #[test]
    fn test_policy_never_caches_compression() {
        assert!(CachePolicy::default().ttl_for(TaskType::CompressContext).is_none());
    }
}
