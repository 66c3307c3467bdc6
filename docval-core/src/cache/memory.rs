//! In-memory cache tier

use super::{CacheEntry, CacheKey};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
struct MemoryEntry {
    entry: CacheEntry,
    deadline: Instant,
    hits: AtomicU64,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }
}

/// Hot tier: read-mostly map guarded by an `RwLock`
///
/// Reads take the shared lock and bump an atomic hit counter, so concurrent
/// lookups never serialize. Expired entries read as a miss until the sweep
/// removes them.
#[derive(Debug, Default)]
pub struct MemoryTier {
    entries: RwLock<HashMap<CacheKey, MemoryEntry>>,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CacheKey) -> Option<Value> {
        let entries = self.entries.read().expect("cache lock poisoned");
        let entry = entries.get(key)?;
        if entry.is_expired(Instant::now()) {
            return None;
        }
        entry.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.entry.value.clone())
    }

    /// Insert or overwrite; last write wins
    ///
    /// A TTL past the clock's range never expires.
    pub fn insert(&self, entry: CacheEntry, ttl: Duration) {
        let now = Instant::now();
        let deadline = now.checked_add(ttl).unwrap_or_else(|| far_future(now));
        let hits = AtomicU64::new(entry.hits);
        let mut entries = self.entries.write().expect("cache lock poisoned");
        entries.insert(
            entry.key.clone(),
            MemoryEntry {
                entry,
                deadline,
                hits,
            },
        );
    }

    pub fn remove(&self, key: &CacheKey) -> bool {
        let mut entries = self.entries.write().expect("cache lock poisoned");
        entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.write().expect("cache lock poisoned").clear();
    }

    /// Drop expired entries, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().expect("cache lock poisoned");
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    /// (live entries, total hits over live entries)
    pub fn counts(&self) -> (usize, u64) {
        let now = Instant::now();
        let entries = self.entries.read().expect("cache lock poisoned");
        entries
            .values()
            .filter(|entry| !entry.is_expired(now))
            .fold((0, 0), |(count, hits), entry| {
                (count + 1, hits + entry.hits.load(Ordering::Relaxed))
            })
    }

    /// Stored entry including its current hit count
    pub fn entry(&self, key: &CacheKey) -> Option<CacheEntry> {
        let entries = self.entries.read().expect("cache lock poisoned");
        let stored = entries.get(key)?;
        if stored.is_expired(Instant::now()) {
            return None;
        }
        let mut entry = stored.entry.clone();
        entry.hits = stored.hits.load(Ordering::Relaxed);
        Some(entry)
    }

    /// Number of stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.read().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn far_future(now: Instant) -> Instant {
    let mut span = Duration::from_secs(u64::MAX / 2);
    loop {
        if let Some(deadline) = now.checked_add(span) {
            return deadline;
        }
        span /= 2;
    }
}

/// Remaining wall-clock lifetime of an entry, if any
pub(crate) fn remaining_ttl(entry: &CacheEntry) -> Option<Duration> {
    (entry.expires_at - Utc::now()).to_std().ok().filter(|d| !d.is_zero())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_reads_as_miss_before_sweep() {
        let tier = MemoryTier::new();
        let key = CacheKey::from("k");
        tier.insert(
            CacheEntry::new(key.clone(), json!(1), Duration::from_secs(10)),
            Duration::from_secs(10),
        );

        assert_eq!(tier.get(&key), Some(json!(1)));
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(tier.get(&key), None);
        assert_eq!(tier.len(), 1);

        assert_eq!(tier.purge_expired(), 1);
        assert!(tier.is_empty());
    }

    #[test]
    fn test_hits_counted() {
        let tier = MemoryTier::new();
        let key = CacheKey::from("k");
        tier.insert(
            CacheEntry::new(key.clone(), json!("v"), Duration::from_secs(60)),
            Duration::from_secs(60),
        );
        tier.get(&key);
        tier.get(&key);
        assert_eq!(tier.counts(), (1, 2));
        assert_eq!(tier.entry(&key).unwrap().hits, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_ttl_never_expires() {
        let tier = MemoryTier::new();
        let key = CacheKey::from("k");
        let ttl = Duration::from_secs(u64::MAX);
        tier.insert(CacheEntry::new(key.clone(), json!(1), ttl), ttl);

        tokio::time::advance(Duration::from_secs(365 * 24 * 60 * 60)).await;
        assert_eq!(tier.get(&key), Some(json!(1)));
        assert_eq!(tier.purge_expired(), 0);
    }
}
