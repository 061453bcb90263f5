//! Cache error types

use redis::RedisError;

/// Error returned by a fetcher supplied to the resilience strategies
pub type FetchError = Box<dyn std::error::Error + Send + Sync>;

/// Cache-related errors
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Timed out connecting to the remote tier after {0:?}")]
    ConnectTimeout(std::time::Duration),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Service unavailable for key {key}")]
    Unavailable { key: String },

    #[error("TTL must be greater than zero (key {key})")]
    InvalidTtl { key: String },
}
