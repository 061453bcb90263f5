//! Local tier: in-process Moka cache with per-entry expiry
//!
//! Each entry carries its own TTL. Moka's timer wheel evicts expired entries;
//! `get` additionally re-checks liveness since eviction is best-effort.

use async_trait::async_trait;
use moka::{Expiry, future::Cache};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::debug;

use crate::{CacheConfig, CacheTier, RawEntry};

/// Expire each entry after whatever lifetime it has left when written.
struct EntryExpiry;

impl Expiry<String, Arc<RawEntry>> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Arc<RawEntry>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.remaining())
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Arc<RawEntry>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.remaining())
    }
}

/// The fast tier. Cloning shares the underlying map.
#[derive(Clone)]
pub struct LocalStore {
    entries: Cache<String, Arc<RawEntry>>,
}

impl LocalStore {
    pub fn new(max_capacity: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(EntryExpiry)
            .build();

        Self { entries }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.local_max_capacity)
    }

    /// Whether a live entry for `key` is resident, without touching it.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

#[async_trait]
impl CacheTier for LocalStore {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn get(&self, key: &str) -> Option<RawEntry> {
        let entry = self.entries.get(key).await?;
        if entry.is_live() {
            return Some(RawEntry::clone(&entry));
        }

        debug!("Local entry for key {} outlived its TTL; dropping", key);
        self.entries.invalidate(key).await;
        None
    }

    async fn set(&self, key: &str, entry: RawEntry) {
        self.entries.insert(key.to_owned(), Arc::new(entry)).await;
    }

    async fn delete(&self, key: &str) -> bool {
        self.entries
            .remove(key)
            .await
            .is_some_and(|entry| entry.is_live())
    }

    async fn clear(&self) {
        self.entries.invalidate_all();
        self.entries.run_pending_tasks().await;
    }

    async fn invalidate_by_tags(&self, tags: &[String]) -> usize {
        let doomed: Vec<(Arc<String>, bool)> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.has_any_tag(tags))
            .map(|(key, entry)| (key, entry.is_live()))
            .collect();

        let mut removed = 0;
        for (key, live) in doomed {
            self.entries.invalidate(key.as_str()).await;
            if live {
                removed += 1;
            }
        }

        debug!("Local tag invalidation {:?} removed {} entries", tags, removed);
        removed
    }

    async fn keys(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.is_live())
            .map(|(key, _)| String::clone(&key))
            .collect()
    }
}
