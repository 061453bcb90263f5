//! Remote tier: shared Redis store
//!
//! Layout:
//! - `<prefix><key>`: JSON envelope of the entry, expiring via `PX` after its TTL
//! - `<prefix>tag:<tag>`: set of entry keys carrying the tag, expiring with its
//!   longest-lived member
//!
//! Tag sets are an index, not the source of truth. A member may outlive its
//! entry (native expiry, invalidation through a sibling tag), so invalidation
//! re-reads each member's envelope and only deletes entries that still carry
//! the tag.
//!
//! Every operation is best effort. Redis errors are logged and reported as a
//! miss or a no-op so the cache keeps serving from the local tier.

use async_trait::async_trait;
use redis::{
    AsyncCommands, RedisResult,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::{CacheError, CacheTier, RawEntry};

const SCAN_BATCH: usize = 500;

/// Reconnect attempts made by the connection manager before giving up
const CONNECT_RETRIES: usize = 2;

/// Builds Redis keys for entries and tag sets.
#[derive(Debug, Clone, Default)]
pub struct RemoteKeys {
    prefix: String,
}

impl RemoteKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn entry_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    pub fn tag_key(&self, tag: &str) -> String {
        format!("{}tag:{}", self.prefix, tag)
    }

    /// SCAN pattern matching every key this store owns
    fn pattern(&self) -> String {
        format!("{}*", self.prefix)
    }

    /// Map a scanned Redis key back to a cache key; `None` for tag sets.
    fn cache_key<'a>(&self, redis_key: &'a str) -> Option<&'a str> {
        let key = redis_key.strip_prefix(self.prefix.as_str())?;
        if key.starts_with("tag:") {
            None
        } else {
            Some(key)
        }
    }
}

/// A tag set's expiry only ever grows, so it outlives every member.
/// `current` is the `PTTL` reply: -2 for a missing key, -1 for no expiry.
fn tag_set_needs_extension(current: i64, member_ttl_ms: u64) -> bool {
    u64::try_from(current).map_or(true, |ms| ms < member_ttl_ms)
}

fn decode_envelope(json: &str) -> Result<RawEntry, serde_json::Error> {
    serde_json::from_str(json)
}

/// The handful of Redis commands the entry and tag-set bookkeeping needs.
#[async_trait]
trait TagIndexCommands: Send {
    async fn read_envelope(&mut self, key: &str) -> RedisResult<Option<String>>;
    async fn write_envelope(&mut self, key: &str, json: String, ttl_ms: u64) -> RedisResult<()>;
    async fn delete_keys(&mut self, keys: &[String]) -> RedisResult<usize>;
    async fn add_member(&mut self, set: &str, member: &str) -> RedisResult<()>;
    async fn remove_member(&mut self, set: &str, member: &str) -> RedisResult<()>;
    async fn set_members(&mut self, set: &str) -> RedisResult<Vec<String>>;
    async fn pttl_ms(&mut self, key: &str) -> RedisResult<i64>;
    async fn pexpire_ms(&mut self, key: &str, ttl_ms: u64) -> RedisResult<()>;
}

#[async_trait]
impl TagIndexCommands for ConnectionManager {
    async fn read_envelope(&mut self, key: &str) -> RedisResult<Option<String>> {
        self.get(key).await
    }

    async fn write_envelope(&mut self, key: &str, json: String, ttl_ms: u64) -> RedisResult<()> {
        self.pset_ex(key, json, ttl_ms).await
    }

    async fn delete_keys(&mut self, keys: &[String]) -> RedisResult<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.del(keys).await
    }

    async fn add_member(&mut self, set: &str, member: &str) -> RedisResult<()> {
        self.sadd(set, member).await
    }

    async fn remove_member(&mut self, set: &str, member: &str) -> RedisResult<()> {
        self.srem(set, member).await
    }

    async fn set_members(&mut self, set: &str) -> RedisResult<Vec<String>> {
        self.smembers(set).await
    }

    async fn pttl_ms(&mut self, key: &str) -> RedisResult<i64> {
        self.pttl(key).await
    }

    async fn pexpire_ms(&mut self, key: &str, ttl_ms: u64) -> RedisResult<()> {
        self.pexpire(key, i64::try_from(ttl_ms).unwrap_or(i64::MAX))
            .await
    }
}

/// Write `entry` under `key` and bring its tag sets in line with its tags.
async fn store_entry<C: TagIndexCommands>(
    conn: &mut C,
    keys: &RemoteKeys,
    key: &str,
    entry: &RawEntry,
    json: String,
) -> RedisResult<()> {
    let redis_key = keys.entry_key(key);
    let ttl_ms = entry.ttl.max(1);

    // Drop the key from tag sets it no longer belongs to
    if let Some(previous) = conn.read_envelope(&redis_key).await?
        && let Ok(previous) = decode_envelope(&previous)
    {
        for tag in previous.tags.difference(&entry.tags) {
            conn.remove_member(&keys.tag_key(tag), &redis_key).await?;
        }
    }

    conn.write_envelope(&redis_key, json, ttl_ms).await?;

    for tag in &entry.tags {
        let tag_key = keys.tag_key(tag);
        conn.add_member(&tag_key, &redis_key).await?;
        let current = conn.pttl_ms(&tag_key).await?;
        if tag_set_needs_extension(current, ttl_ms) {
            conn.pexpire_ms(&tag_key, ttl_ms).await?;
        }
    }

    Ok(())
}

/// Delete the entry stored at `redis_key` and prune it from its tag sets.
/// `skip` names a tag set the caller is about to drop anyway.
async fn remove_entry<C: TagIndexCommands>(
    conn: &mut C,
    keys: &RemoteKeys,
    redis_key: &str,
    previous: Option<&RawEntry>,
    skip: Option<&str>,
) -> RedisResult<bool> {
    let removed = conn.delete_keys(&[redis_key.to_owned()]).await? > 0;

    if let Some(previous) = previous {
        for tag in previous.tags.iter().filter(|t| Some(t.as_str()) != skip) {
            conn.remove_member(&keys.tag_key(tag), redis_key).await?;
        }
    }

    Ok(removed)
}

async fn delete_entry<C: TagIndexCommands>(
    conn: &mut C,
    keys: &RemoteKeys,
    key: &str,
) -> RedisResult<bool> {
    let redis_key = keys.entry_key(key);
    let previous = conn
        .read_envelope(&redis_key)
        .await?
        .and_then(|json| decode_envelope(&json).ok());

    remove_entry(conn, keys, &redis_key, previous.as_ref(), None).await
}

/// Delete every entry that still carries `tag`, then drop the tag set.
/// Members whose entry expired or was re-written without the tag are skipped.
async fn invalidate_tag<C: TagIndexCommands>(
    conn: &mut C,
    keys: &RemoteKeys,
    tag: &str,
) -> RedisResult<usize> {
    let tag_key = keys.tag_key(tag);
    let mut removed = 0;

    for member in conn.set_members(&tag_key).await? {
        let Some(json) = conn.read_envelope(&member).await? else {
            debug!("Tag {} lists expired key {}", tag, member);
            continue;
        };
        match decode_envelope(&json) {
            Ok(entry) if entry.tags.contains(tag) => {
                if remove_entry(conn, keys, &member, Some(&entry), Some(tag)).await? {
                    removed += 1;
                }
            }
            Ok(_) => debug!("Key {} no longer carries tag {}", member, tag),
            Err(e) => warn!(
                "Corrupt remote envelope at {} while invalidating tag {}: {}",
                member, tag, e
            ),
        }
    }

    conn.delete_keys(&[tag_key]).await?;
    Ok(removed)
}

/// Redis-backed tier. Cloning shares the connection manager.
#[derive(Clone)]
pub struct RemoteStore {
    redis: ConnectionManager,
    keys: RemoteKeys,
}

impl RemoteStore {
    /// Connect to `url`. Fails if Redis is unreachable at startup or does not
    /// answer within `connect_timeout`.
    pub async fn connect(
        url: &str,
        prefix: impl Into<String>,
        connect_timeout: Duration,
    ) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let manager_config = ConnectionManagerConfig::new().set_number_of_retries(CONNECT_RETRIES);
        let redis = tokio::time::timeout(
            connect_timeout,
            ConnectionManager::new_with_config(client, manager_config),
        )
        .await
        .map_err(|_| CacheError::ConnectTimeout(connect_timeout))??;
        info!("Remote cache tier connected");

        Ok(Self {
            redis,
            keys: RemoteKeys::new(prefix),
        })
    }

    /// Round-trip a PING; false on any transport error.
    pub async fn ping(&self) -> bool {
        let mut conn = self.redis.clone();
        match redis::cmd("PING").query_async::<String>(&mut conn).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Remote cache PING failed: {}", e);
                false
            }
        }
    }

    async fn scan(&self) -> RedisResult<Vec<String>> {
        let mut conn = self.redis.clone();
        let pattern = self.keys.pattern();
        let mut cursor: u64 = 0;
        let mut found = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            found.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may report a key more than once
        found.sort_unstable();
        found.dedup();
        Ok(found)
    }

    async fn try_clear(&self) -> RedisResult<usize> {
        let mut conn = self.redis.clone();
        let mut removed = 0;
        for chunk in self.scan().await?.chunks(SCAN_BATCH) {
            removed += conn.delete_keys(chunk).await?;
        }
        Ok(removed)
    }
}

#[async_trait]
impl CacheTier for RemoteStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Option<RawEntry> {
        let redis_key = self.keys.entry_key(key);
        let mut conn = self.redis.clone();

        let cached = match conn.read_envelope(&redis_key).await {
            Ok(v) => v,
            Err(e) => {
                warn!(
                    "Remote (Redis) GET error for key {} ({}). Treating as a miss.",
                    key, e
                );
                return None;
            }
        };

        let json = cached?;
        match decode_envelope(&json) {
            Ok(entry) if entry.is_live() => Some(entry),
            Ok(_) => {
                debug!("Remote entry for key {} is past its TTL", key);
                None
            }
            Err(e) => {
                warn!(
                    "Failed to deserialize remote envelope for key {}: {}. Deleting corrupt entry.",
                    key, e
                );
                if let Err(del_err) = conn.delete_keys(&[redis_key.clone()]).await {
                    warn!(
                        "Failed to delete corrupt remote entry for key {} (Redis key: {}): {}",
                        key, redis_key, del_err
                    );
                }
                None
            }
        }
    }

    async fn set(&self, key: &str, entry: RawEntry) {
        let json = match serde_json::to_string(&entry) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to encode envelope for key {}: {}. Skipping remote write.", key, e);
                return;
            }
        };

        let mut conn = self.redis.clone();
        if let Err(e) = store_entry(&mut conn, &self.keys, key, &entry, json).await {
            warn!("Remote (Redis) SET error for key {}: {}. Continuing.", key, e);
        }
    }

    async fn delete(&self, key: &str) -> bool {
        let mut conn = self.redis.clone();
        match delete_entry(&mut conn, &self.keys, key).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!("Remote (Redis) DEL error for key {}: {}. Continuing.", key, e);
                false
            }
        }
    }

    async fn clear(&self) {
        match self.try_clear().await {
            Ok(removed) => debug!("Remote tier cleared ({} keys)", removed),
            Err(e) => warn!("Remote (Redis) clear failed: {}. Continuing.", e),
        }
    }

    async fn invalidate_by_tags(&self, tags: &[String]) -> usize {
        let mut conn = self.redis.clone();
        let mut removed = 0;
        for tag in tags {
            match invalidate_tag(&mut conn, &self.keys, tag).await {
                Ok(n) => removed += n,
                Err(e) => warn!(
                    "Remote (Redis) invalidation error for tag {}: {}. Continuing.",
                    tag, e
                ),
            }
        }
        debug!("Remote tag invalidation {:?} removed {} entries", tags, removed);
        removed
    }

    async fn keys(&self) -> Vec<String> {
        match self.scan().await {
            Ok(found) => found
                .iter()
                .filter_map(|k| self.keys.cache_key(k))
                .map(str::to_owned)
                .collect(),
            Err(e) => {
                warn!("Remote (Redis) SCAN error: {}. Reporting no keys.", e);
                Vec::new()
            }
        }
    }
}
