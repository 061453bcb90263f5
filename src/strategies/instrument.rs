//! Tagged fetches and hit/miss accounting

use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::warn;

use super::{Cacheable, ResilientCache};
use crate::{CacheError, FetchError, SetOptions};

/// Hit/miss counters for one key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitStats {
    pub hits: u64,
    pub misses: u64,
}

impl HitStats {
    /// Fraction of lookups served from cache; 0.0 before the first lookup
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

fn stats_key(key: &str) -> String {
    format!("{key}:stats")
}

impl ResilientCache {
    /// Read-through fetch whose entry also carries `tags`.
    pub async fn tagged<T, F, Fut, S>(
        &self,
        key: &str,
        fetcher: F,
        tags: &[S],
        options: SetOptions,
    ) -> Result<T, CacheError>
    where
        T: Cacheable,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
        S: AsRef<str>,
    {
        let options = options.with_tags(tags.iter().map(|t| t.as_ref().to_owned()));
        self.get_or_fetch(key, fetcher, options).await
    }

    /// Read-through fetch that also counts hits and misses for `key`.
    pub async fn with_hit_rate<T, F, Fut>(
        &self,
        key: &str,
        fetcher: F,
        options: SetOptions,
    ) -> Result<T, CacheError>
    where
        T: Cacheable,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let cached = self.cache.get::<T>(key).await;
        self.record_lookup(key, cached.is_some()).await;

        if let Some(value) = cached {
            return Ok(value);
        }

        let value = fetcher().await?;
        self.cache.set(key, &value, options).await?;
        Ok(value)
    }

    /// Counters recorded by [`with_hit_rate`](Self::with_hit_rate), if any
    pub async fn hit_stats(&self, key: &str) -> Option<HitStats> {
        self.cache.get::<HitStats>(&stats_key(key)).await
    }

    async fn record_lookup(&self, key: &str, hit: bool) {
        let mut stats = self.hit_stats(key).await.unwrap_or_default();
        if hit {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }

        if let Err(e) = self
            .cache
            .set(&stats_key(key), &stats, SetOptions::ttl(self.config.stats_ttl))
            .await
        {
            warn!("Failed to record hit stats for key {}: {}", key, e);
        }
    }
}
