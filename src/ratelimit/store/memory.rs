//! In-process entry store.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::{EntryStore, StoreError};
use crate::ratelimit::clock::Clock;
use crate::ratelimit::entry::LimitEntry;

/// An in-memory entry store backed by a sharded concurrent map.
///
/// Each entry lives until its `reset_time`; after that it reads as absent and
/// is dropped by the next sweep. State is lost on restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, LimitEntry>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every entry whose window has ended. Returns the number removed.
    pub fn evict_expired(&self, now: u64) -> usize {
        evict(&self.entries, now)
    }

    /// Start a background task that evicts expired entries every `interval`.
    ///
    /// The task stops on its own once the store is dropped.
    pub fn spawn_sweeper(&self, interval: Duration, clock: Arc<dyn Clock>) -> JoinHandle<()> {
        let entries = Arc::downgrade(&self.entries);
        tokio::spawn(sweep(entries, interval, clock))
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn evict(entries: &DashMap<String, LimitEntry>, now: u64) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| !entry.is_expired(now));
    before.saturating_sub(entries.len())
}

async fn sweep(entries: Weak<DashMap<String, LimitEntry>>, interval: Duration, clock: Arc<dyn Clock>) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let Some(entries) = entries.upgrade() else {
            debug!("Entry store dropped, stopping sweeper");
            return;
        };

        let evicted = evict(&entries, clock.now_ms());
        if evicted > 0 {
            debug!(evicted, remaining = entries.len(), "Swept expired entries");
        }
    }
}

#[async_trait]
impl EntryStore for MemoryStore {
    async fn increment(
        &self,
        key: &str,
        window: Duration,
        now: u64,
    ) -> Result<LimitEntry, StoreError> {
        // The entry guard holds the shard lock for the whole update.
        let entry = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                occupied.get_mut().record(now, window);
                *occupied.get()
            }
            Entry::Vacant(vacant) => *vacant.insert(LimitEntry::open(now, window)),
        };

        trace!(key, count = entry.count, reset_time = entry.reset_time, "Incremented entry");
        Ok(entry)
    }

    async fn get(&self, key: &str, now: u64) -> Result<Option<LimitEntry>, StoreError> {
        Ok(self
            .entries
            .get(key)
            .map(|entry| *entry.value())
            .filter(|entry| !entry.is_expired(now)))
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;

    const MINUTE: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_increment_opens_then_counts() {
        let store = MemoryStore::new();

        let first = store.increment("k", MINUTE, 0).await.unwrap();
        assert_eq!(first, LimitEntry { count: 1, reset_time: 60_000 });

        let second = store.increment("k", MINUTE, 10).await.unwrap();
        assert_eq!(second, LimitEntry { count: 2, reset_time: 60_000 });
    }

    #[tokio::test]
    async fn test_increment_rolls_over_expired_window() {
        let store = MemoryStore::new();
        store.increment("k", MINUTE, 0).await.unwrap();
        store.increment("k", MINUTE, 1).await.unwrap();

        let entry = store.increment("k", MINUTE, 60_001).await.unwrap();
        assert_eq!(entry, LimitEntry { count: 1, reset_time: 120_001 });
    }

    #[tokio::test]
    async fn test_get_hides_expired_entries() {
        let store = MemoryStore::new();
        store.increment("k", MINUTE, 0).await.unwrap();

        assert!(store.get("k", 60_000).await.unwrap().is_some());
        assert!(store.get("k", 60_001).await.unwrap().is_none());
        assert!(store.get("missing", 0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_missing_key_is_ok() {
        let store = MemoryStore::new();
        store.remove("missing").await.unwrap();

        store.increment("k", MINUTE, 0).await.unwrap();
        store.remove("k").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_evict_expired() {
        let store = MemoryStore::new();
        store.increment("short", Duration::from_secs(1), 0).await.unwrap();
        store.increment("long", MINUTE, 0).await.unwrap();

        assert_eq!(store.evict_expired(1_001), 1);
        assert_eq!(store.len(), 1);
        assert!(store.get("long", 1_001).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_evicts_in_background() {
        let clock = Arc::new(ManualClock::new(0));
        let store = MemoryStore::new();
        store.increment("k", Duration::from_secs(1), 0).await.unwrap();

        let handle = store.spawn_sweeper(Duration::from_secs(120), clock.clone());
        clock.advance(Duration::from_secs(2));

        tokio::time::sleep(Duration::from_secs(121)).await;
        assert!(store.is_empty());

        drop(store);
        tokio::time::sleep(Duration::from_secs(121)).await;
        assert!(handle.is_finished());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_not_lost() {
        let store = Arc::new(MemoryStore::new());

        let tasks: Vec<_> = (0..200)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.increment("shared", MINUTE, 0).await })
            })
            .collect();

        for result in futures::future::join_all(tasks).await {
            result.unwrap().unwrap();
        }

        let entry = store.get("shared", 0).await.unwrap().unwrap();
        assert_eq!(entry.count, 200);
    }
}
