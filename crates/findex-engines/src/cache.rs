//! Distributed cache seam: Redis client and in-memory fallback.
//!
//! The cache holds the two pieces of truly shared mutable state (the
//! fingerprint set and the per-source snapshots), always with
//! replace-whole-value semantics.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use findex_core::{Error, Result};
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tracing::info;

/// Simple get/set/exists with TTL.
#[async_trait]
pub trait DistributedCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a value, optionally expiring after `ttl_secs`.
    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<()>;
}

// ---------------------------------------------------------------
// In-memory fallback
// ---------------------------------------------------------------

/// In-process cache with lazy TTL expiry. The degraded-mode stand-in when
/// Redis is unreachable, and the test double.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, (String, Option<Instant>)>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn live(&self, key: &str) -> Option<String> {
        let entry = self.entries.get(key)?;
        let (value, expires) = entry.value();
        if let Some(expires) = expires {
            if Instant::now() >= *expires {
                drop(entry);
                self.entries.remove(key);
                return None;
            }
        }
        Some(value.clone())
    }
}

#[async_trait]
impl DistributedCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.live(key))
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<()> {
        let expires = ttl_secs.map(|s| Instant::now() + Duration::from_secs(s));
        self.entries
            .insert(key.to_string(), (value.to_string(), expires));
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.live(key).is_some())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------
// Redis client
// ---------------------------------------------------------------

/// Redis-backed cache over a multiplexed async connection.
pub struct RedisCache {
    connection: Arc<Mutex<redis::aio::MultiplexedConnection>>,
}

impl RedisCache {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| Error::Cache(format!("invalid redis url: {e}")))?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::Cache(format!("redis connect failed: {e}")))?;

        info!("Connected to Redis at {}", redis_url);
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }
}

#[async_trait]
impl DistributedCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection.lock().await;
        conn.get(key)
            .await
            .map_err(|e| Error::Cache(format!("GET {key}: {e}")))
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<()> {
        let mut conn = self.connection.lock().await;
        match ttl_secs {
            Some(ttl) => conn
                .set_ex::<_, _, ()>(key, value, ttl)
                .await
                .map_err(|e| Error::Cache(format!("SETEX {key}: {e}"))),
            None => conn
                .set::<_, _, ()>(key, value)
                .await
                .map_err(|e| Error::Cache(format!("SET {key}: {e}"))),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection.lock().await;
        conn.exists(key)
            .await
            .map_err(|e| Error::Cache(format!("EXISTS {key}: {e}")))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection.lock().await;
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| Error::Cache(format!("DEL {key}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_roundtrip() {
        let cache = MemoryCache::new();
        cache.set("k", "v", None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some("v".to_string()));
        assert!(cache.exists("k").await.unwrap());

        cache.delete("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_ttl_expiry() {
        let cache = MemoryCache::new();
        cache.set("short", "v", Some(0)).await.unwrap();
        // TTL of zero is immediately expired
        assert_eq!(cache.get("short").await.unwrap(), None);
        assert!(!cache.exists("short").await.unwrap());

        cache.set("long", "v", Some(3600)).await.unwrap();
        assert!(cache.exists("long").await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_overwrite() {
        let cache = MemoryCache::new();
        cache.set("k", "one", None).await.unwrap();
        cache.set("k", "two", None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some("two".to_string()));
    }
}
