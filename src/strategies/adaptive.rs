//! Adaptive TTL: payloads that are costly to rebuild live longer.

use serde_json::Value;
use std::{future::Future, time::Duration};
use tracing::{debug, error, warn};

use super::{Cacheable, ResilientCache};
use crate::{CacheError, FetchError, ResilienceConfig, SetOptions};

/// Lists get twice the base TTL, large objects one and a half times, each
/// bounded by its cap. Never shorter than `base`.
fn effective_ttl(payload: &Value, base: Duration, config: &ResilienceConfig) -> Duration {
    let scaled = match payload {
        Value::Array(_) => base.mul_f64(2.0).min(config.list_ttl_cap),
        Value::Object(_) if serialized_len(payload) >= config.large_object_bytes => {
            base.mul_f64(1.5).min(config.object_ttl_cap)
        }
        _ => base,
    };
    scaled.max(base)
}

fn serialized_len(payload: &Value) -> usize {
    serde_json::to_vec(payload).map_or(0, |bytes| bytes.len())
}

impl ResilientCache {
    /// Cached fetch with a payload-dependent TTL.
    ///
    /// A failed fetch stores a null placeholder for `placeholder_ttl`; until it
    /// expires callers get `Ok(None)` instead of hitting the failing source
    /// again. The failing call itself returns the fetch error.
    pub async fn adaptive<T, F, Fut>(
        &self,
        key: &str,
        fetcher: F,
        options: SetOptions,
    ) -> Result<Option<T>, CacheError>
    where
        T: Cacheable,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        if let Some(cached) = self.cache.get::<Option<T>>(key).await {
            return Ok(cached);
        }

        match fetcher().await {
            Ok(value) => {
                let base = options.ttl.unwrap_or(self.cache.default_ttl());
                let ttl = effective_ttl(&serde_json::to_value(&value)?, base, &self.config);
                debug!("Adaptive TTL for key {}: {:?} (base {:?})", key, ttl, base);

                self.cache
                    .set(key, &value, options.with_ttl(ttl))
                    .await?;
                Ok(Some(value))
            }
            Err(e) => {
                let ttl = self.config.placeholder_ttl;
                error!(
                    "Fetch failed for key {}: {}. Caching placeholder for {:?}.",
                    key, e, ttl
                );
                let placeholder = SetOptions {
                    ttl: Some(ttl),
                    tags: options.tags,
                    compress: false,
                };
                if let Err(set_err) = self.cache.set(key, &Value::Null, placeholder).await {
                    warn!("Failed to cache placeholder for key {}: {}", key, set_err);
                }
                Err(CacheError::Fetch(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_effective_ttl_scaling() {
        let config = ResilienceConfig::default();
        let base = Duration::from_secs(600);

        assert_eq!(effective_ttl(&json!(7), base, &config), base);
        assert_eq!(effective_ttl(&json!({"a": 1}), base, &config), base);
        assert_eq!(
            effective_ttl(&json!([1, 2, 3]), base, &config),
            Duration::from_secs(1200)
        );

        let large = json!({ "blob": "x".repeat(2048) });
        assert_eq!(
            effective_ttl(&large, base, &config),
            Duration::from_secs(900)
        );
    }

    #[test]
    fn test_effective_ttl_caps_never_shrink_base() {
        let config = ResilienceConfig::default();

        let capped = effective_ttl(&json!([]), Duration::from_secs(5000), &config);
        assert_eq!(capped, config.list_ttl_cap);

        let beyond_cap = Duration::from_secs(10_000);
        assert_eq!(effective_ttl(&json!([]), beyond_cap, &config), beyond_cap);
    }

    #[tokio::test]
    async fn test_list_payload_gets_longer_ttl() {
        let resilient = resilient();
        let value = resilient
            .adaptive(
                "projects",
                || async { Ok::<_, FetchError>(vec![1, 2, 3]) },
                SetOptions::ttl(Duration::from_secs(60)),
            )
            .await
            .unwrap();
        assert_eq!(value, Some(vec![1, 2, 3]));

        let entry = resilient
            .cache()
            .get_entry::<Vec<i32>>("projects")
            .await
            .unwrap();
        assert_eq!(entry.lifetime(), Duration::from_secs(120));
    }

    #[tokio::test]
    async fn test_failure_caches_placeholder() {
        let resilient = resilient();
        let calls = Calls::default();

        let failing = {
            let calls = calls.clone();
            || async move {
                calls.hit();
                Err::<String, FetchError>("upstream timeout".into())
            }
        };
        let err = resilient
            .adaptive("k", failing, SetOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Fetch(_)));

        let entry = resilient
            .cache()
            .get_entry::<Option<String>>("k")
            .await
            .unwrap();
        assert_eq!(entry.data, None);
        assert_eq!(entry.lifetime(), Duration::from_secs(60));

        // Placeholder short-circuits the next caller
        let next = {
            let calls = calls.clone();
            || async move {
                calls.hit();
                Ok::<_, FetchError>("fresh".to_owned())
            }
        };
        let value = resilient
            .adaptive("k", next, SetOptions::default())
            .await
            .unwrap();
        assert_eq!(value, None);
        assert_eq!(calls.count(), 1);
    }
}
