//! Bounded key/value store with per-entry expiration.
//!
//! Expiration happens two ways:
//! - lazily, when `get` finds an expired entry it removes it
//! - actively, via [`TtlCache::sweep`] (driven by [`super::spawn_sweeper`])
//!
//! Capacity eviction is FIFO by creation time, not LRU: reads never
//! refresh an entry's position.

use crate::clock::Clock;
use crate::StreamgateError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A single cached value with its creation time and lifetime.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// Cached payload.
    pub value: V,

    /// When the entry was (last) set.
    pub created_at: DateTime<Utc>,

    /// How long the entry stays readable.
    pub ttl: Duration,

    /// Insertion sequence, breaks ties between equal `created_at` values.
    seq: u64,
}

impl<V> CacheEntry<V> {
    /// An entry is live while `now - created_at < ttl`.
    ///
    /// A `created_at` in the future (clock stepped backwards) counts as age zero.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match now.signed_duration_since(self.created_at).to_std() {
            Ok(age) => age >= self.ttl,
            Err(_) => false,
        }
    }
}

struct Store<V> {
    entries: HashMap<String, CacheEntry<V>>,
    next_seq: u64,
}

/// Process-wide TTL cache.
///
/// Create one instance and share it behind an `Arc`. All operations take
/// `&self`; a single mutex guards the map and the sweep.
pub struct TtlCache<V = serde_json::Value> {
    store: Mutex<Store<V>>,
    capacity: usize,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<V: Clone> TtlCache<V> {
    /// Create a cache holding at most `capacity` entries.
    pub fn new(capacity: usize, default_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Mutex::new(Store {
                entries: HashMap::new(),
                next_seq: 0,
            }),
            capacity: capacity.max(1),
            default_ttl,
            clock,
        }
    }

    /// Create a cache sized from configuration.
    pub fn from_config(config: &crate::StreamgateConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(config.cache_capacity, config.cache_default_ttl, clock)
    }

    /// Insert or overwrite `key` using the default TTL.
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    /// Insert or overwrite `key` with an explicit TTL.
    ///
    /// Inserting a new key while at capacity evicts the single oldest entry
    /// first. Overwriting an existing key never evicts.
    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let now = self.clock.now_utc();
        let mut store = self.store.lock();

        if !store.entries.contains_key(&key) && store.entries.len() >= self.capacity {
            let oldest = store
                .entries
                .iter()
                .min_by_key(|(_, entry)| (entry.created_at, entry.seq))
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                store.entries.remove(&oldest);
                debug!(evicted = %oldest, "Cache at capacity, evicted oldest entry");
            }
        }

        let seq = store.next_seq;
        store.next_seq += 1;
        store.entries.insert(
            key,
            CacheEntry {
                value,
                created_at: now,
                ttl,
                seq,
            },
        );
    }

    /// Get a live value, removing the entry if it has expired.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now_utc();
        let mut store = self.store.lock();

        match store.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => Some(entry.value.clone()),
            Some(_) => {
                store.entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Whether `key` holds a live value.
    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Remove `key`. Returns whether an entry (live or expired) was present.
    pub fn delete(&self, key: &str) -> bool {
        self.store.lock().entries.remove(key).is_some()
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.store.lock().entries.clear();
    }

    /// Remove all expired entries, returning how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_utc();
        let mut store = self.store.lock();
        let before = store.entries.len();
        store.entries.retain(|_, entry| !entry.is_expired(now));
        before - store.entries.len()
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.store.lock().entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.store.lock().entries.is_empty()
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Serve a live entry, or await `fetch` and cache its success.
    ///
    /// Errors from `fetch` are returned unchanged and nothing is cached.
    /// The lock is not held across the await, so two concurrent misses
    /// may both fetch; the later `set` wins.
    pub async fn get_or_try_insert_with<F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(hit) = self.get(key) {
            return Ok(hit);
        }
        let value = fetch().await?;
        self.set_with_ttl(key, value.clone(), ttl);
        Ok(value)
    }
}

impl TtlCache<serde_json::Value> {
    /// Serialize `value` and store it.
    pub fn set_json<T: Serialize>(
        &self,
        key: impl Into<String>,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), StreamgateError> {
        let json = serde_json::to_value(value)
            .map_err(|e| StreamgateError::ProtocolError(format!("Failed to serialize: {}", e)))?;
        self.set_with_ttl(key, json, ttl.unwrap_or(self.default_ttl));
        Ok(())
    }

    /// Read and deserialize a live value.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StreamgateError> {
        self.get(key)
            .map(|json| {
                serde_json::from_value(json).map_err(|e| {
                    StreamgateError::ProtocolError(format!("Cached value has wrong shape: {}", e))
                })
            })
            .transpose()
    }
}
