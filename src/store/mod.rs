//! Dual-tier state persistence.
//!
//! An ephemeral keyed cache (fast, best-effort, TTL) sits in front of a
//! durable transactional store (authoritative, always awaited). Writes go to
//! both: the cache write is fire-and-forget and must never affect
//! correctness; the durable write is awaited before the caller's control
//! loop proceeds. Reads try the cache first, fall back to the durable store,
//! and repopulate the cache on a hit.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::StoreError;

/// Best-effort cache tier. Failures are logged and swallowed.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Store a value with a TTL.
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError>;

    /// Fetch a non-expired value.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
}

/// Authoritative durable tier. The real deployment backs this with a
/// transactional database; tests and the simulator use [`MemoryDurable`].
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Insert or replace a record.
    async fn upsert(&self, key: &str, value: String) -> Result<(), StoreError>;

    /// Point lookup by key.
    async fn fetch(&self, key: &str) -> Result<Option<String>, StoreError>;
}

struct CacheEntry {
    value: String,
    expires_at: Instant,
}

/// In-process cache tier.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
}

impl MemoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        // Clone out of the shard guard before any removal to avoid
        // re-entrant locking on the same shard.
        let fresh = self.entries.get(key).map(|entry| {
            if entry.expires_at > Instant::now() {
                Some(entry.value.clone())
            } else {
                None
            }
        });
        match fresh {
            Some(Some(value)) => Ok(Some(value)),
            Some(None) => {
                self.entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

/// In-memory durable tier for tests and simulation.
#[derive(Default)]
pub struct MemoryDurable {
    records: DashMap<String, String>,
}

impl MemoryDurable {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl DurableStore for MemoryDurable {
    async fn upsert(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.records.insert(key.to_string(), value);
        Ok(())
    }

    async fn fetch(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.records.get(key).map(|v| v.clone()))
    }
}

/// Dual-tier store keyed by window identifier.
#[derive(Clone)]
pub struct StateStore {
    cache: Arc<dyn CacheStore>,
    durable: Arc<dyn DurableStore>,
    ttl: Duration,
}

impl StateStore {
    /// Build a store over the given tiers.
    pub fn new(cache: Arc<dyn CacheStore>, durable: Arc<dyn DurableStore>, ttl: Duration) -> Self {
        Self { cache, durable, ttl }
    }

    /// Convenience constructor over the in-memory tiers.
    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(
            Arc::new(MemoryCache::new()),
            Arc::new(MemoryDurable::new()),
            ttl,
        )
    }

    /// Persist a record: cache fire-and-forget, durable awaited.
    pub async fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let json = serde_json::to_string(value).map_err(|e| StoreError::WriteFailed {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        let cache = Arc::clone(&self.cache);
        let cache_key = key.to_string();
        let cache_value = json.clone();
        let ttl = self.ttl;
        tokio::spawn(async move {
            if let Err(e) = cache.put(&cache_key, cache_value, ttl).await {
                warn!(key = %cache_key, error = %e, "cache write failed");
            }
        });

        self.durable.upsert(key, json).await
    }

    /// Load a record: cache first, durable fallback with cache repopulation.
    pub async fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.cache.get(key).await {
            Ok(Some(json)) => {
                let value = serde_json::from_str(&json).map_err(|source| StoreError::Corrupt {
                    key: key.to_string(),
                    source,
                })?;
                return Ok(Some(value));
            }
            Ok(None) => {}
            Err(e) => warn!(key, error = %e, "cache read failed, falling back to durable store"),
        }

        let Some(json) = self.durable.fetch(key).await? else {
            return Ok(None);
        };

        debug!(key, "cache miss, repopulating from durable store");
        if let Err(e) = self.cache.put(key, json.clone(), self.ttl).await {
            warn!(key, error = %e, "cache repopulation failed");
        }

        let value = serde_json::from_str(&json).map_err(|source| StoreError::Corrupt {
            key: key.to_string(),
            source,
        })?;
        Ok(Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Record {
        name: String,
        count: u32,
    }

    /// Cache that fails every operation, for best-effort verification.
    struct BrokenCache;

    #[async_trait]
    impl CacheStore for BrokenCache {
        async fn put(&self, key: &str, _value: String, _ttl: Duration) -> Result<(), StoreError> {
            Err(StoreError::WriteFailed {
                key: key.to_string(),
                reason: "cache down".to_string(),
            })
        }

        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::WriteFailed {
                key: key.to_string(),
                reason: "cache down".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let store = StateStore::in_memory(Duration::from_secs(60));
        let record = Record {
            name: "window-1".to_string(),
            count: 3,
        };

        store.save("btc-15m:0", &record).await.unwrap();
        let loaded: Option<Record> = store.load("btc-15m:0").await.unwrap();
        assert_eq!(loaded, Some(record));
    }

    #[tokio::test]
    async fn load_falls_back_to_durable_and_repopulates() {
        let cache = Arc::new(MemoryCache::new());
        let durable = Arc::new(MemoryDurable::new());
        durable
            .upsert("k", serde_json::to_string(&Record { name: "x".into(), count: 1 }).unwrap())
            .await
            .unwrap();

        let store = StateStore::new(cache.clone(), durable, Duration::from_secs(60));
        let loaded: Option<Record> = store.load("k").await.unwrap();
        assert!(loaded.is_some());

        // Repopulated: now served from cache.
        assert!(cache.get("k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn broken_cache_never_blocks_correctness() {
        let durable = Arc::new(MemoryDurable::new());
        let store = StateStore::new(Arc::new(BrokenCache), durable, Duration::from_secs(60));

        let record = Record {
            name: "w".to_string(),
            count: 9,
        };
        store.save("k", &record).await.unwrap();
        let loaded: Option<Record> = store.load("k").await.unwrap();
        assert_eq!(loaded, Some(record));
    }

    #[tokio::test]
    async fn expired_cache_entries_are_not_served() {
        let cache = MemoryCache::new();
        cache
            .put("k", "1".to_string(), Duration::from_millis(0))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(cache.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_key_is_none_not_error() {
        let store = StateStore::in_memory(Duration::from_secs(60));
        let loaded: Option<Record> = store.load("nope").await.unwrap();
        assert!(loaded.is_none());
    }
}
