use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard, broadcast};

use super::authz::Authorizer;
use super::board_cache::BoardCache;
use super::db::DbHandle;
use super::models::{Column, Principal, WorkItem};
use crate::errors::BoardError;

/// Emitted after every committed mutation.
///
/// Consumers (the counter cache and the fan-out pump) only ever see
/// committed state, so nothing they do can roll a mutation back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MutationEvent {
    Created {
        item_id: i64,
        column: Column,
        position: i64,
        version: i64,
    },
    Moved {
        item_id: i64,
        from_column: Column,
        to_column: Column,
        from_position: i64,
        to_position: i64,
        version: i64,
    },
    Deleted {
        item_id: i64,
        column: Column,
        position: i64,
        version: i64,
    },
}

impl MutationEvent {
    pub fn version(&self) -> i64 {
        match self {
            Self::Created { version, .. }
            | Self::Moved { version, .. }
            | Self::Deleted { version, .. } => *version,
        }
    }

    pub fn item_id(&self) -> i64 {
        match self {
            Self::Created { item_id, .. }
            | Self::Moved { item_id, .. }
            | Self::Deleted { item_id, .. } => *item_id,
        }
    }
}

/// The only writer of item placement.
///
/// Each mutation validates, commits in one store transaction, refreshes
/// the board cache and then emits a [`MutationEvent`]. Events leave in
/// commit order: the commit-order guard is held from the store call until
/// the event is sent, so versions on the event channel strictly increase.
pub struct MoveCoordinator {
    db: DbHandle,
    board_cache: Arc<BoardCache>,
    authorizer: Arc<dyn Authorizer>,
    events: broadcast::Sender<MutationEvent>,
    commit_order: Mutex<()>,
}

impl MoveCoordinator {
    pub fn new(
        db: DbHandle,
        board_cache: Arc<BoardCache>,
        authorizer: Arc<dyn Authorizer>,
        event_buffer: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(event_buffer.max(1));
        Self {
            db,
            board_cache,
            authorizer,
            events,
            commit_order: Mutex::new(()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MutationEvent> {
        self.events.subscribe()
    }

    pub fn authorizer(&self) -> Arc<dyn Authorizer> {
        Arc::clone(&self.authorizer)
    }

    pub async fn get_item(&self, id: i64) -> Result<WorkItem, BoardError> {
        self.db
            .call(move |db| db.get_item(id))
            .await?
            .ok_or(BoardError::ItemNotFound { id })
    }

    /// Create an item at the end of `column` (default `estimates`).
    pub async fn create_item(
        &self,
        principal: &Principal,
        title: &str,
        description: &str,
        column: Option<&str>,
    ) -> Result<WorkItem, BoardError> {
        if !self.authorizer.can_edit(principal) {
            return Err(forbidden(principal, "create work items"));
        }
        let title = title.trim();
        if title.is_empty() {
            return Err(BoardError::InvalidRequest("title must not be empty".into()));
        }
        let column = match column {
            Some(c) => Column::from_str(c)?,
            None => Column::default(),
        };

        let (title, description) = (title.to_string(), description.to_string());
        let _order = self.lock_commit_order().await?;
        let (item, version) = self
            .db
            .call(move |db| db.create_item(&title, &description, column))
            .await?;
        tracing::info!(item_id = item.id, column = %column, position = item.position, "created work item");

        self.after_commit(MutationEvent::Created {
            item_id: item.id,
            column: item.column,
            position: item.position,
            version,
        })
        .await;
        Ok(item)
    }

    /// Move an item to `target_column` at `target_position`.
    ///
    /// Positions past the end of the target column append. A move onto the
    /// item's current placement succeeds without writing or emitting. The
    /// `can_move` check runs inside the store transaction against the item
    /// as locked there.
    pub async fn move_item(
        &self,
        principal: &Principal,
        item_id: i64,
        target_column: &str,
        target_position: i64,
    ) -> Result<WorkItem, BoardError> {
        let target = Column::from_str(target_column)?;
        let authorizer = Arc::clone(&self.authorizer);
        let mover = principal.clone();

        let _order = self.lock_commit_order().await?;
        let outcome = self
            .db
            .call(move |db| {
                db.apply_move_checked(
                    item_id,
                    target,
                    target_position,
                    Some(mover.name.as_str()),
                    |item| {
                        if authorizer.can_move(&mover, item) {
                            Ok(())
                        } else {
                            Err(forbidden(&mover, &format!("move work item {}", item_id)))
                        }
                    },
                )
            })
            .await
            .inspect_err(|e| {
                tracing::debug!(item_id, to = %target, error = %e, "move rejected");
            })?;

        if outcome.is_noop() {
            tracing::debug!(item_id, column = %target, "move is a no-op");
            return Ok(outcome.item);
        }
        tracing::info!(
            item_id,
            from = %outcome.from.column,
            to = %outcome.to.column,
            from_position = outcome.from.position,
            to_position = outcome.to.position,
            version = outcome.version,
            "moved work item"
        );

        self.after_commit(MutationEvent::Moved {
            item_id,
            from_column: outcome.from.column,
            to_column: outcome.to.column,
            from_position: outcome.from.position,
            to_position: outcome.to.position,
            version: outcome.version,
        })
        .await;
        Ok(outcome.item)
    }

    pub async fn delete_item(&self, principal: &Principal, item_id: i64) -> Result<(), BoardError> {
        if !self.authorizer.can_edit(principal) {
            return Err(forbidden(principal, "delete work items"));
        }
        let _order = self.lock_commit_order().await?;
        let (placement, version) = self
            .db
            .call(move |db| db.delete_item(item_id))
            .await?
            .ok_or(BoardError::ItemNotFound { id: item_id })?;
        tracing::info!(item_id, column = %placement.column, "deleted work item");

        self.after_commit(MutationEvent::Deleted {
            item_id,
            column: placement.column,
            position: placement.position,
            version,
        })
        .await;
        Ok(())
    }

    /// Taken before a mutation's store call and held until its event is
    /// sent. The wait is bounded like a store wait.
    async fn lock_commit_order(&self) -> Result<MutexGuard<'_, ()>, BoardError> {
        let wait = self.db.wait_timeout();
        tokio::time::timeout(wait, self.commit_order.lock())
            .await
            .map_err(|_| {
                BoardError::Contention(format!("mutation queue busy for more than {:?}", wait))
            })
    }

    /// The mutation is already durable here; failures are logged, never
    /// returned. Callers hold the commit-order guard.
    async fn after_commit(&self, event: MutationEvent) {
        if let Err(e) = self.board_cache.refresh().await {
            // refresh() invalidates first, so the next read rebuilds.
            tracing::warn!(version = event.version(), error = %e, "board cache refresh failed after commit");
        }
        if self.events.send(event).is_err() {
            tracing::debug!("no mutation event subscribers");
        }
    }
}

fn forbidden(principal: &Principal, action: &str) -> BoardError {
    BoardError::Forbidden {
        principal: principal.name.clone(),
        action: action.to_string(),
    }
}
