//! Opt-in request coalescing
//!
//! The first caller to miss on a key becomes the leader and runs the fetcher;
//! callers arriving while it is in flight wait on a watch channel and receive
//! the same value or the same error.

use serde::Deserialize;
use serde_json::Value;
use std::{collections::HashMap, future::Future, sync::Arc};
use tokio::sync::{RwLock, watch};
use tracing::debug;

use super::{Cacheable, ResilientCache};
use crate::{CacheError, FetchError, SetOptions};

/// Outcome shared with waiters; `None` until the leader finishes
type Shared = Option<Result<Value, String>>;
type InFlightFetch = watch::Receiver<Shared>;
type InFlightSender = watch::Sender<Shared>;
type InFlightMap = Arc<RwLock<HashMap<String, InFlightFetch>>>;

/// In-flight fetches by key
#[derive(Clone, Default)]
pub(super) struct InFlight {
    fetches: InFlightMap,
}

/// Leader's registration for one key.
///
/// Dropping it without `complete` (the leader future was cancelled or
/// panicked) fails the waiters. Either way the key is released, but only if
/// the map still holds this guard's own channel.
struct InFlightGuard {
    key: String,
    fetches: InFlightMap,
    tx: Option<InFlightSender>,
    rx: InFlightFetch,
}

impl InFlightGuard {
    /// Publish the leader's outcome to every waiter.
    fn complete(mut self, result: Result<Value, String>) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Some(result));
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Some(Err("Fetch was cancelled or panicked".to_owned())));
        }

        // Only remove our own registration; a newer leader may own the key by now
        let key = std::mem::take(&mut self.key);
        let own = self.rx.clone();
        let remove = move |fetches: &mut HashMap<String, InFlightFetch>| {
            if fetches.get(&key).is_some_and(|rx| rx.same_channel(&own)) {
                fetches.remove(&key);
            }
        };

        match self.fetches.try_write() {
            Ok(mut fetches) => remove(&mut *fetches),
            Err(_) => {
                let fetches = Arc::clone(&self.fetches);
                tokio::spawn(async move {
                    remove(&mut *fetches.write().await);
                });
            }
        }
    }
}

async fn wait_for<T: Cacheable>(key: &str, mut rx: InFlightFetch) -> Result<T, CacheError> {
    debug!("Waiting for in-flight fetch for key: {}", key);

    loop {
        if let Some(result) = rx.borrow().as_ref() {
            return match result {
                Ok(value) => T::deserialize(value).map_err(CacheError::from),
                Err(e) => Err(CacheError::Fetch(e.clone().into())),
            };
        }
        if rx.changed().await.is_err() {
            return Err(CacheError::Fetch("In-flight fetch was cancelled".into()));
        }
    }
}

impl ResilientCache {
    /// Read-through fetch where concurrent misses on `key` share one fetcher
    /// call. Errors reach waiters as [`CacheError::Fetch`] with the leader's
    /// message.
    pub async fn coalesced<T, F, Fut>(
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

        let existing = self.in_flight.fetches.read().await.get(key).cloned();
        if let Some(rx) = existing {
            return wait_for(key, rx).await;
        }

        let guard = {
            let mut fetches = self.in_flight.fetches.write().await;
            // Another caller may have become leader between the read and write locks
            if let Some(existing) = fetches.get(key) {
                let rx = existing.clone();
                drop(fetches);
                return wait_for(key, rx).await;
            }

            let (tx, rx) = watch::channel(None);
            fetches.insert(key.to_owned(), rx.clone());
            InFlightGuard {
                key: key.to_owned(),
                fetches: Arc::clone(&self.in_flight.fetches),
                tx: Some(tx),
                rx,
            }
        };

        let result = async {
            let value = fetcher().await?;
            self.cache.set(key, &value, options).await?;
            Ok::<_, CacheError>(value)
        }
        .await;

        guard.complete(match &result {
            Ok(value) => serde_json::to_value(value).map_err(|e| e.to_string()),
            // Waiters re-wrap the message in `CacheError::Fetch`
            Err(CacheError::Fetch(e)) => Err(e.to_string()),
            Err(e) => Err(e.to_string()),
        });

        result
    }
}
