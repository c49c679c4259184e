//! Counter Cache: derived counts over work items, cached with their own TTL.
//!
//! Counts are a display aid only. Anything correctness-critical must ask
//! the record store directly.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::cache::CacheBackend;
use super::db::DbHandle;
use super::models::{Column, WorkStatus};
use crate::errors::BoardError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "by", content = "value", rename_all = "snake_case")]
pub enum CountPredicate {
    Status(WorkStatus),
    Column(Column),
}

impl CountPredicate {
    /// Items still waiting for work to start.
    pub fn pending() -> Self {
        Self::Status(WorkStatus::Pending)
    }

    /// Key used both in the cache backend and in `count_update` messages.
    pub fn cache_key(&self) -> String {
        match self {
            Self::Status(s) => format!("count:status:{}", s),
            Self::Column(c) => format!("count:column:{}", c),
        }
    }
}

impl fmt::Display for CountPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cache_key())
    }
}

pub struct CounterCache {
    backend: Arc<dyn CacheBackend>,
    db: DbHandle,
    ttl: Duration,
    tracked: Vec<CountPredicate>,
}

impl CounterCache {
    /// A counter cache tracking the pending count.
    pub fn new(backend: Arc<dyn CacheBackend>, db: DbHandle, ttl: Duration) -> Self {
        Self {
            backend,
            db,
            ttl,
            tracked: vec![CountPredicate::pending()],
        }
    }

    /// Also refresh `predicate` on every mutation.
    pub fn track(mut self, predicate: CountPredicate) -> Self {
        if !self.tracked.contains(&predicate) {
            self.tracked.push(predicate);
        }
        self
    }

    pub fn tracked(&self) -> &[CountPredicate] {
        &self.tracked
    }

    pub async fn get_count(&self, predicate: CountPredicate) -> Result<i64, BoardError> {
        let key = predicate.cache_key();
        match self.backend.get(&key).await {
            Ok(Some(raw)) => match raw.parse::<i64>() {
                Ok(count) => return Ok(count),
                Err(_) => tracing::warn!(key = %key, "discarding undecodable cached count"),
            },
            Ok(None) => {}
            Err(e) => tracing::warn!(key = %key, error = %e, "counter cache read failed"),
        }
        self.refresh(predicate).await
    }

    /// Recompute from the record store and cache the result.
    pub async fn refresh(&self, predicate: CountPredicate) -> Result<i64, BoardError> {
        let count = self
            .db
            .call(move |db| match predicate {
                CountPredicate::Status(s) => db.count_by_status(s),
                CountPredicate::Column(c) => db.count_in_column(c),
            })
            .await?;
        let key = predicate.cache_key();
        if let Err(e) = self.backend.set(&key, count.to_string(), self.ttl).await {
            tracing::warn!(key = %key, error = %e, "failed to cache count");
        }
        Ok(count)
    }

    pub async fn invalidate(&self, predicate: CountPredicate) {
        let key = predicate.cache_key();
        if let Err(e) = self.backend.delete(&key).await {
            tracing::warn!(key = %key, error = %e, "failed to invalidate count");
        }
    }

    /// Refresh every tracked predicate. Predicates whose refresh fails are
    /// invalidated and left out of the result.
    pub async fn refresh_all(&self) -> Vec<(CountPredicate, i64)> {
        let mut counts = Vec::with_capacity(self.tracked.len());
        for predicate in &self.tracked {
            match self.refresh(*predicate).await {
                Ok(count) => counts.push((*predicate, count)),
                Err(e) => {
                    tracing::warn!(predicate = %predicate, error = %e, "count refresh failed");
                    self.invalidate(*predicate).await;
                }
            }
        }
        counts
    }

    /// Prime the cache at start-up.
    pub async fn warm(&self) -> Result<(), BoardError> {
        for predicate in &self.tracked {
            let count = self.refresh(*predicate).await?;
            tracing::info!(predicate = %predicate, count, "warmed counter cache");
        }
        Ok(())
    }
}
