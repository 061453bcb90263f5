//! Refresh-ahead and stale-while-revalidate.
//!
//! Both serve the cached value immediately and refresh in a detached task.

use std::future::Future;
use tracing::debug;

use super::{Cacheable, ResilientCache};
use crate::{CacheError, FetchError, SetOptions};

impl ResilientCache {
    /// Serve hits directly; once an entry has used `refresh_threshold` of its
    /// TTL, start refetching it in the background.
    pub async fn refresh_ahead<T, F, Fut>(
        &self,
        key: &str,
        fetcher: F,
        options: SetOptions,
    ) -> Result<T, CacheError>
    where
        T: Cacheable,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        if let Some(entry) = self.cache.get_entry::<T>(key).await {
            let threshold = entry.lifetime().mul_f64(self.config.refresh_threshold);
            if entry.age() >= threshold {
                debug!(
                    "Key {} is {:?} into a {:?} TTL; refreshing ahead",
                    key,
                    entry.age(),
                    entry.lifetime()
                );
                self.spawn_refresh(key, fetcher, options);
            }
            return Ok(entry.data);
        }

        let value = fetcher().await?;
        self.cache.set(key, &value, options).await?;
        Ok(value)
    }

    /// Serve hits directly and always refetch them in the background.
    pub async fn stale_while_revalidate<T, F, Fut>(
        &self,
        key: &str,
        fetcher: F,
        options: SetOptions,
    ) -> Result<T, CacheError>
    where
        T: Cacheable,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        if let Some(value) = self.cache.get::<T>(key).await {
            debug!("Serving cached key {} while revalidating", key);
            self.spawn_refresh(key, fetcher, options);
            return Ok(value);
        }

        let value = fetcher().await?;
        self.cache.set(key, &value, options).await?;
        Ok(value)
    }
}
