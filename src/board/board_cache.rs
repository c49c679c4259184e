use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use super::cache::CacheBackend;
use super::db::DbHandle;
use super::models::BoardSnapshot;
use super::rebuild::rebuild;
use crate::errors::BoardError;

pub const BOARD_SNAPSHOT_KEY: &str = "workflow:board_snapshot";

/// Cached materialization of the board.
///
/// Reads are served from the backend while the entry is fresh and rebuilt
/// from the record store otherwise. Writes are versioned against the
/// highest version ever stored, which survives invalidation: a slow rebuild
/// racing a mutation cannot resurrect pre-mutation ordering, even in the
/// gap between that mutation's invalidate and its own rebuild.
pub struct BoardCache {
    backend: Arc<dyn CacheBackend>,
    db: DbHandle,
    ttl: Duration,
    // Highest snapshot version stored so far. The lock also serializes the
    // compare-and-set against the backend.
    newest: Mutex<i64>,
}

impl BoardCache {
    pub fn new(backend: Arc<dyn CacheBackend>, db: DbHandle, ttl: Duration) -> Self {
        Self {
            backend,
            db,
            ttl,
            newest: Mutex::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the cached snapshot, rebuilding and caching it on a miss.
    pub async fn get_snapshot(&self) -> Result<BoardSnapshot, BoardError> {
        if let Some(snapshot) = self.read_cached().await {
            tracing::debug!(version = snapshot.version, "board cache hit");
            return Ok(snapshot);
        }
        tracing::debug!("board cache miss, rebuilding");
        let snapshot = self.rebuild_from_store().await?;
        self.write_snapshot(&snapshot).await;
        Ok(snapshot)
    }

    /// Discard the cached snapshot unconditionally.
    pub async fn invalidate(&self) {
        let _newest = self.newest.lock().await;
        if let Err(e) = self.backend.delete(BOARD_SNAPSHOT_KEY).await {
            tracing::warn!(error = %e, "failed to invalidate board snapshot");
        }
    }

    /// Store a caller-computed snapshot unless a newer one has been stored
    /// before, whether or not that one is still cached.
    ///
    /// Returns whether the snapshot was stored.
    pub async fn write_snapshot(&self, snapshot: &BoardSnapshot) -> bool {
        let mut newest = self.newest.lock().await;
        if snapshot.version < *newest {
            tracing::debug!(
                newest = *newest,
                offered = snapshot.version,
                "rejecting board snapshot older than one already stored"
            );
            return false;
        }
        let payload = match serde_json::to_string(snapshot) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize board snapshot");
                return false;
            }
        };
        match self.backend.set(BOARD_SNAPSHOT_KEY, payload, self.ttl).await {
            Ok(()) => {
                *newest = snapshot.version;
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to store board snapshot");
                false
            }
        }
    }

    /// Invalidate, rebuild from the store, and cache the result.
    ///
    /// Used after every committed mutation.
    pub async fn refresh(&self) -> Result<BoardSnapshot, BoardError> {
        self.invalidate().await;
        let snapshot = self.rebuild_from_store().await?;
        self.write_snapshot(&snapshot).await;
        Ok(snapshot)
    }

    async fn rebuild_from_store(&self) -> Result<BoardSnapshot, BoardError> {
        self.db.call(|db| rebuild(db)).await.map_err(|e| match e {
            BoardError::Contention(_) | BoardError::StoreUnavailable(_) => e,
            other => BoardError::CacheRebuildFailure(other.to_string()),
        })
    }

    /// Backend failures and undecodable payloads count as a miss.
    async fn read_cached(&self) -> Option<BoardSnapshot> {
        let raw = match self.backend.get(BOARD_SNAPSHOT_KEY).await {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(error = %e, "board cache read failed, treating as miss");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!(error = %e, "discarding undecodable board snapshot");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::cache::MemoryCache;
    use crate::board::db::BoardDb;
    use crate::board::models::Column;
    use anyhow::Result;
    use async_trait::async_trait;

    fn setup(ttl: Duration) -> Result<(BoardCache, Arc<MemoryCache>, DbHandle)> {
        let backend = Arc::new(MemoryCache::new(16));
        let db = DbHandle::new(BoardDb::new_in_memory()?, Duration::from_secs(1));
        let cache = BoardCache::new(backend.clone(), db.clone(), ttl);
        Ok((cache, backend, db))
    }

    struct BrokenBackend;

    #[async_trait]
    impl CacheBackend for BrokenBackend {
        async fn get(&self, _key: &str) -> anyhow::Result<Option<String>> {
            anyhow::bail!("connection refused")
        }
        async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> anyhow::Result<()> {
            anyhow::bail!("connection refused")
        }
        async fn delete(&self, _key: &str) -> anyhow::Result<()> {
            anyhow::bail!("connection refused")
        }
    }

    #[tokio::test]
    async fn miss_rebuilds_and_populates() -> Result<()> {
        let (cache, backend, db) = setup(Duration::from_secs(60))?;
        db.call(|db| db.create_item("A", "", Column::Estimates)).await?;

        let snap = cache.get_snapshot().await?;

        assert_eq!(snap.item_count(), 1);
        assert!(backend.get(BOARD_SNAPSHOT_KEY).await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn cleared_cache_self_heals_to_store_state() -> Result<()> {
        let (cache, _backend, db) = setup(Duration::from_secs(60))?;
        db.call(|db| db.create_item("A", "", Column::Estimates)).await?;
        cache.get_snapshot().await?;
        db.call(|db| db.create_item("B", "", Column::InProgress)).await?;

        cache.invalidate().await;
        let healed = cache.get_snapshot().await?;
        let direct = db.call(|db| rebuild(db)).await?;

        assert_eq!(healed, direct);
        Ok(())
    }

    #[tokio::test]
    async fn stale_entry_expires_after_ttl() -> Result<()> {
        let (cache, _backend, db) = setup(Duration::from_millis(30))?;
        cache.get_snapshot().await?;
        // Uncoordinated write behind the cache's back.
        db.call(|db| db.create_item("A", "", Column::Estimates)).await?;
        assert_eq!(cache.get_snapshot().await?.item_count(), 0);

        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(cache.get_snapshot().await?.item_count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn older_snapshot_never_replaces_newer() -> Result<()> {
        let (cache, _backend, _db) = setup(Duration::from_secs(60))?;
        assert!(cache.write_snapshot(&BoardSnapshot::empty(5)).await);
        assert!(!cache.write_snapshot(&BoardSnapshot::empty(3)).await);
        assert_eq!(cache.get_snapshot().await?.version, 5);
        assert!(cache.write_snapshot(&BoardSnapshot::empty(6)).await);
        assert_eq!(cache.get_snapshot().await?.version, 6);
        Ok(())
    }

    #[tokio::test]
    async fn invalidation_does_not_reopen_the_door_to_older_snapshots() -> Result<()> {
        let (cache, backend, _db) = setup(Duration::from_secs(60))?;
        assert!(cache.write_snapshot(&BoardSnapshot::empty(5)).await);

        cache.invalidate().await;

        assert!(!cache.write_snapshot(&BoardSnapshot::empty(4)).await);
        assert!(backend.get(BOARD_SNAPSHOT_KEY).await?.is_none());
        assert!(cache.write_snapshot(&BoardSnapshot::empty(5)).await);
        assert_eq!(cache.get_snapshot().await?.version, 5);
        Ok(())
    }

    #[tokio::test]
    async fn undecodable_payload_is_a_miss() -> Result<()> {
        let (cache, backend, _db) = setup(Duration::from_secs(60))?;
        backend
            .set(BOARD_SNAPSHOT_KEY, "{not json".into(), Duration::from_secs(60))
            .await?;

        let snap = cache.get_snapshot().await?;

        assert_eq!(snap, BoardSnapshot::empty(0));
        Ok(())
    }

    #[tokio::test]
    async fn refresh_reflects_latest_store_state() -> Result<()> {
        let (cache, _backend, db) = setup(Duration::from_secs(60))?;
        cache.get_snapshot().await?;
        let (item, version) = db.call(|db| db.create_item("A", "", Column::Estimates)).await?;

        let snap = cache.refresh().await?;

        assert_eq!(snap.version, version);
        assert_eq!(snap.ids(Column::Estimates), vec![item.id]);
        assert_eq!(cache.get_snapshot().await?, snap);
        Ok(())
    }

    #[tokio::test]
    async fn broken_backend_falls_back_to_store() -> Result<()> {
        let db = DbHandle::new(BoardDb::new_in_memory()?, Duration::from_secs(1));
        db.call(|db| db.create_item("A", "", Column::Estimates)).await?;
        let cache = BoardCache::new(Arc::new(BrokenBackend), db, Duration::from_secs(60));

        let snap = cache.get_snapshot().await?;
        cache.invalidate().await;

        assert_eq!(snap.item_count(), 1);
        Ok(())
    }
}
