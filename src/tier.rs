//! Storage tier abstraction shared by the local and remote stores

use async_trait::async_trait;

use crate::RawEntry;

/// One backing store composed by the [`CacheManager`](crate::CacheManager).
///
/// Tiers never fail: transport problems are logged inside the tier and
/// reported as a miss or a no-op.
#[async_trait]
pub trait CacheTier: Send + Sync + 'static {
    /// A name for tracing, e.g. "local" or "redis"
    fn name(&self) -> &'static str;

    /// Return the entry if it is present and live.
    async fn get(&self, key: &str) -> Option<RawEntry>;

    /// Store the entry, replacing any previous one and its expiry.
    async fn set(&self, key: &str, entry: RawEntry);

    /// Returns true if the key was present.
    async fn delete(&self, key: &str) -> bool;

    async fn clear(&self);

    /// Remove every entry carrying at least one of `tags`; returns how many.
    async fn invalidate_by_tags(&self, tags: &[String]) -> usize;

    async fn keys(&self) -> Vec<String>;

    async fn size(&self) -> usize {
        self.keys().await.len()
    }
}
