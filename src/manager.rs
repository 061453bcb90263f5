//! Cache manager composing the local and remote tiers
//!
//! - `set` writes through to both tiers before returning
//! - `get` reads local first, then remote, promoting remote hits into local
//! - `delete`, `clear` and `invalidate_by_tags` fan out to both tiers
//!
//! The remote tier is optional; without it the manager behaves as a plain
//! local cache. Cross-tier consistency is best effort: a value may briefly be
//! visible in one tier and absent from the other.

use serde::{Serialize, de::DeserializeOwned};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

use crate::{
    Base64Codec, CacheConfig, CacheEntry, CacheError, CacheTier, Codec, LocalStore, RawEntry,
    RemoteStore, SetOptions,
};

/// Introspection snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub remote_enabled: bool,
    pub local_size: usize,
}

/// Two-tier cache. Construct once at startup and share clones with consumers.
#[derive(Clone)]
pub struct CacheManager {
    inner: Arc<CacheManagerInner>,
}

struct CacheManagerInner {
    local: LocalStore,
    remote: Option<Arc<dyn CacheTier>>,
    codec: Arc<dyn Codec>,
    default_ttl: Duration,
}

impl CacheManager {
    /// Build the tiers described by `config`.
    ///
    /// A missing or unreachable remote endpoint is not an error: the manager
    /// logs it and runs local-only.
    pub async fn new(config: CacheConfig) -> Self {
        let local = LocalStore::from_config(&config);

        let remote: Option<Arc<dyn CacheTier>> = match &config.remote_url {
            Some(url) => match RemoteStore::connect(
                url,
                config.remote_prefix.clone(),
                config.remote_connect_timeout,
            )
            .await
            {
                Ok(store) => Some(Arc::new(store)),
                Err(e) => {
                    warn!("Remote cache tier unavailable ({}). Running local-only.", e);
                    None
                }
            },
            None => {
                info!("No remote cache configured. Running local-only.");
                None
            }
        };

        Self::with_tiers(local, remote, config.default_ttl)
    }

    /// Assemble a manager from existing tiers.
    pub fn with_tiers(
        local: LocalStore,
        remote: Option<Arc<dyn CacheTier>>,
        default_ttl: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(CacheManagerInner {
                local,
                remote,
                codec: Arc::new(Base64Codec),
                default_ttl,
            }),
        }
    }

    /// Replace the codec used for entries stored with `compress`.
    pub fn with_codec(self, codec: impl Codec) -> Self {
        Self {
            inner: Arc::new(CacheManagerInner {
                local: self.inner.local.clone(),
                remote: self.inner.remote.clone(),
                codec: Arc::new(codec),
                default_ttl: self.inner.default_ttl,
            }),
        }
    }

    pub fn local(&self) -> &LocalStore {
        &self.inner.local
    }

    pub fn remote_enabled(&self) -> bool {
        self.inner.remote.is_some()
    }

    pub fn default_ttl(&self) -> Duration {
        self.inner.default_ttl
    }

    /// Store `data` in every tier. Only a contract violation (zero TTL) or an
    /// unserializable payload fails; remote write problems are logged.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        data: &T,
        options: SetOptions,
    ) -> Result<(), CacheError> {
        let ttl = options.ttl.unwrap_or(self.inner.default_ttl);
        if ttl.as_millis() == 0 {
            return Err(CacheError::InvalidTtl {
                key: key.to_owned(),
            });
        }

        let entry = RawEntry::seal(
            data,
            ttl,
            options.tags.into_iter().collect(),
            options.compress,
            self.inner.codec.as_ref(),
        )?;

        match &self.inner.remote {
            Some(remote) => {
                tokio::join!(
                    self.inner.local.set(key, entry.clone()),
                    remote.set(key, entry)
                );
            }
            None => self.inner.local.set(key, entry).await,
        }

        debug!("Cached key {} for {:?}", key, ttl);
        Ok(())
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_entry(key).await.map(|entry| entry.data)
    }

    /// Like [`get`](Self::get) but keeps the lifetime metadata.
    pub async fn get_entry<T: DeserializeOwned>(&self, key: &str) -> Option<CacheEntry<T>> {
        let raw = self.get_raw(key).await?;
        match raw.open(self.inner.codec.as_ref()) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(
                    "Failed to decode cached value for key {}: {}. Deleting corrupt entry.",
                    key, e
                );
                self.delete(key).await;
                None
            }
        }
    }

    async fn get_raw(&self, key: &str) -> Option<RawEntry> {
        if let Some(entry) = self.inner.local.get(key).await {
            debug!("Cache hit local for key: {}", key);
            return Some(entry);
        }

        debug!("Cache miss local for key: {}", key);

        let remote = self.inner.remote.as_ref()?;
        let Some(entry) = remote.get(key).await else {
            debug!("Cache miss {} for key: {}", remote.name(), key);
            return None;
        };

        debug!("Cache hit {} for key: {}", remote.name(), key);

        // Warm the local tier for no longer than the local default
        let promoted = if entry.remaining() <= self.inner.default_ttl {
            entry.clone()
        } else {
            entry.renewed(self.inner.default_ttl)
        };
        self.inner.local.set(key, promoted).await;

        Some(entry)
    }

    /// Returns true if either tier held the key.
    pub async fn delete(&self, key: &str) -> bool {
        let (local, remote) = match &self.inner.remote {
            Some(remote) => tokio::join!(self.inner.local.delete(key), remote.delete(key)),
            None => (self.inner.local.delete(key).await, false),
        };
        debug!("Deleted key {} (local: {}, remote: {})", key, local, remote);
        local || remote
    }

    pub async fn clear(&self) {
        self.inner.local.clear().await;
        if let Some(remote) = &self.inner.remote {
            remote.clear().await;
        }
        info!("Cache cleared");
    }

    /// Remove every entry carrying any of `tags`; returns the sum over tiers.
    pub async fn invalidate_by_tags<S: AsRef<str>>(&self, tags: &[S]) -> usize {
        let tags: Vec<String> = tags.iter().map(|t| t.as_ref().to_owned()).collect();

        let local = self.inner.local.invalidate_by_tags(&tags).await;
        let remote = match &self.inner.remote {
            Some(remote) => remote.invalidate_by_tags(&tags).await,
            None => 0,
        };

        debug!(
            "Invalidated tags {:?}: {} local, {} remote",
            tags, local, remote
        );
        local + remote
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            remote_enabled: self.remote_enabled(),
            local_size: self.inner.local.size().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    const HOUR: Duration = Duration::from_secs(3600);

    fn local_only() -> CacheManager {
        CacheManager::with_tiers(LocalStore::new(1_000), None, HOUR)
    }

    /// A second in-process store stands in for Redis.
    fn two_tier() -> (CacheManager, LocalStore) {
        let remote = LocalStore::new(1_000);
        let cache = CacheManager::with_tiers(
            LocalStore::new(1_000),
            Some(Arc::new(remote.clone())),
            HOUR,
        );
        (cache, remote)
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Project {
        id: u32,
        name: String,
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        for cache in [local_only(), two_tier().0] {
            cache
                .set("k", "v", SetOptions::ttl(Duration::from_secs(1)))
                .await
                .unwrap();
            assert_eq!(cache.get::<String>("k").await.as_deref(), Some("v"));

            tokio::time::sleep(Duration::from_millis(1_100)).await;
            assert_eq!(cache.get::<String>("k").await, None);
        }
    }

    #[tokio::test]
    async fn test_tag_invalidation_precision() {
        let cache = local_only();
        cache
            .set("a", &1, SetOptions::default().with_tags(["x"]))
            .await
            .unwrap();
        cache
            .set("b", &2, SetOptions::default().with_tags(["y"]))
            .await
            .unwrap();

        assert_eq!(cache.invalidate_by_tags(&["x"]).await, 1);
        assert_eq!(cache.get::<i32>("a").await, None);
        assert_eq!(cache.get::<i32>("b").await, Some(2));
    }

    #[tokio::test]
    async fn test_tag_invalidation_counts_both_tiers() {
        let (cache, remote) = two_tier();
        cache
            .set("a", &1, SetOptions::default().with_tags(["x"]))
            .await
            .unwrap();

        assert_eq!(cache.invalidate_by_tags(&["x"]).await, 2);
        assert!(remote.get("a").await.is_none());
        assert_eq!(cache.get::<i32>("a").await, None);
    }

    #[tokio::test]
    async fn test_remote_hit_is_promoted() {
        let (cache, remote) = two_tier();
        cache.set("k", "v", SetOptions::default()).await.unwrap();
        assert!(remote.get("k").await.is_some());

        cache.local().clear().await;
        assert!(!cache.local().contains("k"));

        assert_eq!(cache.get::<String>("k").await.as_deref(), Some("v"));
        assert!(cache.local().contains("k"));
    }

    #[tokio::test]
    async fn test_promotion_keeps_remaining_lifetime() {
        let remote = LocalStore::new(100);
        let cache = CacheManager::with_tiers(
            LocalStore::new(100),
            Some(Arc::new(remote.clone())),
            Duration::from_secs(10),
        );

        cache
            .set("short", &1, SetOptions::ttl(Duration::from_secs(5)))
            .await
            .unwrap();
        cache
            .set("long", &2, SetOptions::ttl(Duration::from_secs(600)))
            .await
            .unwrap();
        cache.local().clear().await;

        let short = cache.get_entry::<i32>("short").await.unwrap();
        assert_eq!(short.ttl, 5_000);
        assert_eq!(cache.get::<i32>("long").await, Some(2));

        let promoted = cache.local().get("long").await.unwrap();
        assert_eq!(promoted.ttl, 10_000);
    }

    #[tokio::test]
    async fn test_local_only_degrades_gracefully() {
        let cache = local_only();
        assert_eq!(
            cache.stats().await,
            CacheStats {
                remote_enabled: false,
                local_size: 0
            }
        );

        let project = Project {
            id: 1,
            name: "atlas".to_owned(),
        };
        cache.set("p:1", &project, SetOptions::default()).await.unwrap();
        assert_eq!(cache.get::<Project>("p:1").await, Some(project));
        assert_eq!(cache.stats().await.local_size, 1);

        assert!(cache.delete("p:1").await);
        assert!(!cache.delete("p:1").await);
        assert_eq!(cache.invalidate_by_tags(&["nothing"]).await, 0);
        cache.clear().await;
    }

    #[tokio::test]
    async fn test_unreachable_remote_runs_local_only() {
        let config = CacheConfig::default()
            .with_remote_url(Some("redis://127.0.0.1:1".to_owned()));
        let cache = tokio::time::timeout(Duration::from_secs(5), CacheManager::new(config))
            .await
            .expect("startup should not wait on an unreachable remote");

        assert!(!cache.remote_enabled());
        cache.set("k", &5, SetOptions::default()).await.unwrap();
        assert_eq!(cache.get::<i32>("k").await, Some(5));
    }

    #[tokio::test]
    async fn test_delete_reaches_both_tiers() {
        let (cache, remote) = two_tier();
        cache.set("k", &1, SetOptions::default()).await.unwrap();
        cache.local().clear().await;

        assert!(cache.delete("k").await);
        assert!(remote.get("k").await.is_none());
        assert_eq!(cache.get::<i32>("k").await, None);
    }

    #[tokio::test]
    async fn test_compressed_round_trip() {
        let (cache, remote) = two_tier();
        let project = Project {
            id: 9,
            name: "zeta".to_owned(),
        };
        cache
            .set("p:9", &project, SetOptions::default().compressed())
            .await
            .unwrap();

        let stored = remote.get("p:9").await.unwrap();
        assert!(stored.compressed);
        assert!(stored.data.is_string());
        assert_eq!(cache.get::<Project>("p:9").await, Some(project));
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_a_miss() {
        let (cache, remote) = two_tier();
        cache.set("k", "text", SetOptions::default()).await.unwrap();

        assert_eq!(cache.get::<u64>("k").await, None);
        assert!(!cache.local().contains("k"));
        assert!(remote.get("k").await.is_none());
    }

    #[tokio::test]
    async fn test_zero_ttl_is_rejected() {
        let cache = local_only();
        let err = cache
            .set("k", &1, SetOptions::ttl(Duration::ZERO))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidTtl { .. }));
    }

    #[tokio::test]
    async fn test_repeated_get_is_idempotent() {
        let cache = local_only();
        cache.set("k", &[1, 2, 3], SetOptions::default()).await.unwrap();

        let first = cache.get::<Vec<i32>>("k").await;
        let second = cache.get::<Vec<i32>>("k").await;
        assert_eq!(first, Some(vec![1, 2, 3]));
        assert_eq!(first, second);
        assert_eq!(cache.stats().await.local_size, 1);
    }
}
