//! Key-value cache backend with per-entry TTL.
//!
//! The board only ever treats the cache as derived state: every read that
//! misses, expires or fails falls back to the record store. [`CacheBackend`]
//! is the seam for an external store; [`MemoryCache`] is the in-process
//! implementation used by the server and the tests.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Return the value for `key` if present and not expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Remove `key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}

struct Entry {
    value: String,
    inserted_at: Instant,
    expires_at: Instant,
}

/// Bounded in-memory cache.
///
/// Expired entries are purged on every access. When full, the oldest entry
/// is evicted to make room.
pub struct MemoryCache {
    max_entries: usize,
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries);
        entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn purge_expired(entries: &mut HashMap<String, Entry>) {
    let now = Instant::now();
    entries.retain(|_, e| e.expires_at > now);
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries);
        Ok(entries.get(key).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries);
        if !entries.contains_key(key) && entries.len() >= self.max_entries {
            let victim = entries
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(k, _)| k.clone());
            if let Some(victim) = victim {
                tracing::debug!(key = %victim, "evicting oldest cache entry");
                entries.remove(&victim);
            }
        }
        let now = Instant::now();
        entries.insert(
            key.to_string(),
            Entry {
                value,
                inserted_at: now,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get() -> Result<()> {
        let cache = MemoryCache::new(8);
        cache.set("k", "v".into(), Duration::from_secs(60)).await?;
        assert_eq!(cache.get("k").await?.as_deref(), Some("v"));
        assert_eq!(cache.get("missing").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() -> Result<()> {
        let cache = MemoryCache::new(8);
        cache.set("k", "v".into(), Duration::from_millis(20)).await?;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.get("k").await?, None);
        assert!(cache.is_empty().await);
        Ok(())
    }

    #[tokio::test]
    async fn delete_is_idempotent() -> Result<()> {
        let cache = MemoryCache::new(8);
        cache.set("k", "v".into(), Duration::from_secs(60)).await?;
        cache.delete("k").await?;
        cache.delete("k").await?;
        assert_eq!(cache.get("k").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn full_cache_evicts_oldest() -> Result<()> {
        let cache = MemoryCache::new(2);
        cache.set("a", "1".into(), Duration::from_secs(60)).await?;
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache.set("b", "2".into(), Duration::from_secs(60)).await?;
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache.set("c", "3".into(), Duration::from_secs(60)).await?;

        assert_eq!(cache.get("a").await?, None);
        assert_eq!(cache.get("b").await?.as_deref(), Some("2"));
        assert_eq!(cache.get("c").await?.as_deref(), Some("3"));
        assert_eq!(cache.len().await, 2);
        Ok(())
    }

    #[tokio::test]
    async fn overwriting_a_key_does_not_evict() -> Result<()> {
        let cache = MemoryCache::new(2);
        cache.set("a", "1".into(), Duration::from_secs(60)).await?;
        cache.set("b", "2".into(), Duration::from_secs(60)).await?;
        cache.set("b", "3".into(), Duration::from_secs(60)).await?;
        assert_eq!(cache.get("a").await?.as_deref(), Some("1"));
        assert_eq!(cache.get("b").await?.as_deref(), Some("3"));
        Ok(())
    }
}
