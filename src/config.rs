//! Cache configuration

use std::time::Duration;

/// Environment variable holding the Redis connection string
pub const REMOTE_URL_ENV: &str = "REDIS_URL";

/// Configuration for the two-tier cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries in the local tier
    pub local_max_capacity: u64,
    /// TTL applied when `SetOptions` does not name one, and the upper bound
    /// for entries promoted from the remote tier
    pub default_ttl: Duration,
    /// Redis connection string; `None` runs the cache local-only
    pub remote_url: Option<String>,
    /// Prefix prepended to every Redis key (entries and tag sets)
    pub remote_prefix: String,
    /// Upper bound on the initial Redis connection; past it the cache runs
    /// local-only
    pub remote_connect_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            local_max_capacity: 10_000,
            default_ttl: Duration::from_secs(3600), // 1 hour
            remote_url: None,
            remote_prefix: String::new(),
            remote_connect_timeout: Duration::from_secs(2),
        }
    }
}

impl CacheConfig {
    /// Defaults, with the remote tier enabled when `REDIS_URL` is set and non-empty.
    pub fn from_env() -> Self {
        Self::default().with_remote_url(std::env::var(REMOTE_URL_ENV).ok())
    }

    /// Set the remote endpoint. Blank strings are treated as absent.
    pub fn with_remote_url(mut self, url: Option<String>) -> Self {
        self.remote_url = url
            .map(|u| u.trim().to_owned())
            .filter(|u| !u.is_empty());
        self
    }
}

/// Tunables for the resilience strategies
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    /// Fraction of the TTL after which refresh-ahead kicks in
    pub refresh_threshold: f64,
    /// Consecutive failures that open the circuit
    pub error_threshold: u32,
    /// Lifetime of the circuit breaker error counter
    pub error_ttl: Duration,
    /// Lifetime of the placeholder stored after a failed adaptive fetch
    pub placeholder_ttl: Duration,
    /// Lifetime of hit/miss counters
    pub stats_ttl: Duration,
    /// Upper bound for the doubled TTL of list payloads
    pub list_ttl_cap: Duration,
    /// Upper bound for the scaled TTL of large object payloads
    pub object_ttl_cap: Duration,
    /// Serialized size from which an object counts as large
    pub large_object_bytes: usize,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            refresh_threshold: 0.8,
            error_threshold: 3,
            error_ttl: Duration::from_secs(300),    // 5 minutes
            placeholder_ttl: Duration::from_secs(60),
            stats_ttl: Duration::from_secs(86_400), // 24 hours
            list_ttl_cap: Duration::from_secs(7200),
            object_ttl_cap: Duration::from_secs(5400),
            large_object_bytes: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_remote_url_is_absent() {
        let config = CacheConfig::default().with_remote_url(Some("   ".to_owned()));
        assert!(config.remote_url.is_none());

        let config = CacheConfig::default().with_remote_url(Some(" redis://localhost ".to_owned()));
        assert_eq!(config.remote_url.as_deref(), Some("redis://localhost"));
    }

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.default_ttl, Duration::from_secs(3600));
        assert!(config.remote_url.is_none());
        assert!(config.remote_prefix.is_empty());
        assert_eq!(config.remote_connect_timeout, Duration::from_secs(2));

        let resilience = ResilienceConfig::default();
        assert_eq!(resilience.error_threshold, 3);
        assert_eq!(resilience.error_ttl, Duration::from_secs(300));
        assert_eq!(resilience.placeholder_ttl, Duration::from_secs(60));
    }
}
