//! Resilience strategies layered over [`CacheManager`]
//!
//! Every strategy takes a key, a zero-argument async fetcher and write
//! options, and decides when to call the fetcher and what to cache. They only
//! use the manager's public contract and can be mixed freely per call site.
//!
//! Apart from [`ResilientCache::coalesced`], concurrent misses on the same key
//! each invoke their own fetcher.

use serde::{Serialize, de::DeserializeOwned};
use std::{future::Future, sync::Arc};
use tracing::{debug, warn};

use crate::{CacheError, CacheManager, FetchError, ResilienceConfig, SetOptions};

mod adaptive;
mod circuit;
mod coalesce;
mod instrument;
mod refresh;

pub use instrument::HitStats;

/// Trait for types that can be cached
pub trait Cacheable: Serialize + DeserializeOwned + Send + Sync + 'static {}
impl<T> Cacheable for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Cache manager plus strategy tunables. Cheap to clone.
#[derive(Clone)]
pub struct ResilientCache {
    cache: CacheManager,
    config: Arc<ResilienceConfig>,
    in_flight: coalesce::InFlight,
}

impl ResilientCache {
    pub fn new(cache: CacheManager, config: ResilienceConfig) -> Self {
        Self {
            cache,
            config: Arc::new(config),
            in_flight: coalesce::InFlight::default(),
        }
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    /// Plain read-through: return the cached value, or fetch, cache and return.
    pub async fn get_or_fetch<T, F, Fut>(
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
        if let Some(value) = self.cache.get::<T>(key).await {
            return Ok(value);
        }

        let value = fetcher().await?;
        self.cache.set(key, &value, options).await?;
        Ok(value)
    }

    /// Run `fetcher` detached and overwrite `key` with its result.
    /// Failures are logged and dropped.
    fn spawn_refresh<T, F, Fut>(&self, key: &str, fetcher: F, options: SetOptions)
    where
        T: Cacheable,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let cache = self.cache.clone();
        let key = key.to_owned();

        tokio::spawn(async move {
            match fetcher().await {
                Ok(value) => match cache.set(&key, &value, options).await {
                    Ok(()) => debug!("Background refresh stored key: {}", key),
                    Err(e) => warn!("Background refresh could not cache key {}: {}", key, e),
                },
                Err(e) => debug!("Background refresh failed for key {}: {}", key, e),
            }
        });
    }
}
