//! Circuit breaker keyed per cache key.
//!
//! Consecutive fetch failures are counted in the cache itself under
//! `<key>:error`, so the count expires on its own after `error_ttl`.

use std::future::Future;
use tracing::{error, warn};

use super::{Cacheable, ResilientCache};
use crate::{CacheError, FetchError, SetOptions};

fn error_key(key: &str) -> String {
    format!("{key}:error")
}

impl ResilientCache {
    /// While fewer than `error_threshold` failures are on record, call the
    /// fetcher and cache its result. Once the threshold is reached, stop
    /// calling it: serve the cached value if there is one, otherwise
    /// [`CacheError::Unavailable`].
    pub async fn circuit_breaker<T, F, Fut>(
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
        let error_key = error_key(key);
        let failures = self.failure_count(key).await;

        if failures >= self.config.error_threshold {
            return match self.cache.get::<T>(key).await {
                Some(value) => {
                    warn!(
                        "Circuit open for key {} ({} failures); serving cached value",
                        key, failures
                    );
                    Ok(value)
                }
                None => {
                    warn!(
                        "Circuit open for key {} ({} failures) and nothing cached",
                        key, failures
                    );
                    Err(CacheError::Unavailable {
                        key: key.to_owned(),
                    })
                }
            };
        }

        match fetcher().await {
            Ok(value) => {
                self.cache.set(key, &value, options).await?;
                self.cache.delete(&error_key).await;
                Ok(value)
            }
            Err(e) => {
                let failures = failures + 1;
                error!(
                    "Fetch failed for key {} ({} consecutive failures): {}",
                    key, failures, e
                );
                if let Err(set_err) = self
                    .cache
                    .set(&error_key, &failures, SetOptions::ttl(self.config.error_ttl))
                    .await
                {
                    warn!("Failed to record failure for key {}: {}", key, set_err);
                }
                Err(CacheError::Fetch(e))
            }
        }
    }

    /// Failures currently on record for `key`
    pub async fn failure_count(&self, key: &str) -> u32 {
        self.cache.get::<u32>(&error_key(key)).await.unwrap_or(0)
    }
}
