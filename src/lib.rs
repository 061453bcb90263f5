//! tiercache - Two-tier caching library
//!
//! This library puts a two-tier cache in front of expensive reads:
//! - Local: in-memory Moka cache with per-entry TTL (fastest)
//! - Remote: optional Redis store shared across instances
//!
//! The cache supports:
//! - Write-through `set` and local-first `get` with promotion of remote hits
//! - Tag-based bulk invalidation across both tiers
//! - Graceful local-only operation when Redis is absent or unreachable
//! - Resilience strategies: adaptive TTL, refresh-ahead,
//!   stale-while-revalidate, circuit breaker, hit-rate accounting and
//!   opt-in request coalescing

mod codec;
mod config;
mod entry;
mod error;
mod local;
mod manager;
mod remote;
pub mod strategies;
mod tier;

pub use codec::{Base64Codec, Codec};
pub use config::{CacheConfig, REMOTE_URL_ENV, ResilienceConfig};
pub use entry::{CacheEntry, RawEntry, SetOptions, now_millis};
pub use error::{CacheError, FetchError};
pub use local::LocalStore;
pub use manager::{CacheManager, CacheStats};
pub use remote::{RemoteKeys, RemoteStore};
pub use strategies::{Cacheable, HitStats, ResilientCache};
pub use tier::CacheTier;

// Re-export async_trait for custom tier implementations
pub use async_trait::async_trait;
