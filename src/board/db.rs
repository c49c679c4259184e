use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params};

use super::models::*;
use super::transition::{self, Placement, Transition};
use crate::errors::BoardError;

pub type StoreResult<T> = Result<T, BoardError>;

/// Async-safe handle to the record store.
///
/// Runs every access on tokio's blocking pool. Waiting for the handle is
/// bounded: if another task holds the connection for longer than
/// `wait_timeout` the call fails with [`BoardError::Contention`].
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<tokio::sync::Mutex<BoardDb>>,
    wait_timeout: Duration,
}

impl DbHandle {
    pub fn new(db: BoardDb, wait_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(tokio::sync::Mutex::new(db)),
            wait_timeout,
        }
    }

    /// How long a caller may wait for the handle before giving up.
    pub fn wait_timeout(&self) -> Duration {
        self.wait_timeout
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> StoreResult<R>
    where
        F: FnOnce(&BoardDb) -> StoreResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let guard = tokio::time::timeout(self.wait_timeout, Arc::clone(&self.inner).lock_owned())
            .await
            .map_err(|_| {
                BoardError::Contention(format!(
                    "record store handle busy for more than {:?}",
                    self.wait_timeout
                ))
            })?;
        tokio::task::spawn_blocking(move || f(&guard))
            .await
            .map_err(|e| BoardError::Other(anyhow!("record store task panicked: {}", e)))?
    }
}

/// Result of a committed (or no-op) move.
#[derive(Debug, Clone)]
pub struct MoveOutcome {
    pub item: WorkItem,
    pub from: Placement,
    pub to: Placement,
    pub transition: Transition,
    /// Board version after the move.
    pub version: i64,
}

impl MoveOutcome {
    pub fn is_noop(&self) -> bool {
        self.transition == Transition::Noop
    }
}

/// Durable table of work items backed by SQLite.
///
/// Mutations run inside `BEGIN IMMEDIATE` transactions, which take the
/// database write lock up front. That lock covers the moved row and every
/// row in the affected position ranges of both columns, so concurrent
/// writers (in this process or another one) serialize. Lock waits are
/// bounded by the connection's busy timeout.
pub struct BoardDb {
    conn: Connection,
}

impl BoardDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn open(path: &Path, lock_timeout: Duration) -> StoreResult<Self> {
        let conn = Connection::open(path).map_err(|e| {
            BoardError::StoreUnavailable(format!("failed to open {}: {}", path.display(), e))
        })?;
        conn.busy_timeout(lock_timeout)?;
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        tracing::debug!(path = %path.display(), journal_mode = %mode, "opened record store");
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| BoardError::StoreUnavailable(e.to_string()))?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> StoreResult<()> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.run_migrations()
    }

    fn run_migrations(&self) -> StoreResult<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS work_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                column_name TEXT NOT NULL DEFAULT 'estimates',
                position INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS item_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                item_id INTEGER NOT NULL REFERENCES work_items(id) ON DELETE CASCADE,
                from_column TEXT NOT NULL,
                to_column TEXT NOT NULL,
                actor TEXT,
                at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS board_meta (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );
            INSERT OR IGNORE INTO board_meta (id, version) VALUES (1, 0);

            CREATE INDEX IF NOT EXISTS idx_work_items_column
                ON work_items(column_name, position, created_at);
            CREATE INDEX IF NOT EXISTS idx_work_items_status ON work_items(status);
            CREATE INDEX IF NOT EXISTS idx_item_history_item ON item_history(item_id);
            ",
        )?;
        Ok(())
    }

    /// Begin a read transaction so that several queries see one store state.
    pub fn begin_read(&self) -> StoreResult<Transaction<'_>> {
        Ok(Transaction::new_unchecked(
            &self.conn,
            TransactionBehavior::Deferred,
        )?)
    }

    fn begin_write(&self) -> StoreResult<Transaction<'_>> {
        Ok(Transaction::new_unchecked(
            &self.conn,
            TransactionBehavior::Immediate,
        )?)
    }

    // ── Board version ─────────────────────────────────────────────────

    pub fn version(&self) -> StoreResult<i64> {
        Ok(self
            .conn
            .query_row("SELECT version FROM board_meta WHERE id = 1", [], |row| row.get(0))?)
    }

    fn bump_version(&self) -> StoreResult<i64> {
        self.conn
            .execute("UPDATE board_meta SET version = version + 1 WHERE id = 1", [])?;
        self.version()
    }

    // ── Queries ───────────────────────────────────────────────────────

    /// Highest position in `column`, or -1 when the column is empty.
    pub fn max_position(&self, column: Column) -> StoreResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COALESCE(MAX(position), -1) FROM work_items WHERE column_name = ?1",
            params![column.as_str()],
            |row| row.get(0),
        )?)
    }

    pub fn count_in_column(&self, column: Column) -> StoreResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM work_items WHERE column_name = ?1",
            params![column.as_str()],
            |row| row.get(0),
        )?)
    }

    pub fn count_by_status(&self, status: WorkStatus) -> StoreResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM work_items WHERE status = ?1",
            params![status.as_str()],
            |row| row.get(0),
        )?)
    }

    /// Items of one column in board order.
    ///
    /// `created_at` breaks position ties and `id` breaks the rest, so the
    /// result is fully determined by store contents.
    pub fn list_column(&self, column: Column) -> StoreResult<Vec<ItemSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, status, position, created_at
             FROM work_items WHERE column_name = ?1
             ORDER BY position ASC, created_at ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![column.as_str()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;
        let mut items = Vec::new();
        for row in rows {
            let (id, title, status, position, created_at) = row?;
            items.push(ItemSummary {
                id,
                title,
                status: parse_status(&status)?,
                position,
                created_at,
            });
        }
        Ok(items)
    }

    fn placement(&self, id: i64) -> StoreResult<Option<Placement>> {
        let row = self
            .conn
            .query_row(
                "SELECT column_name, position FROM work_items WHERE id = ?1",
                params![id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;
        match row {
            Some((column, position)) => Ok(Some(Placement::new(parse_column(&column)?, position))),
            None => Ok(None),
        }
    }

    pub fn get_item(&self, id: i64) -> StoreResult<Option<WorkItem>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, title, description, column_name, position, status, created_at, updated_at
                 FROM work_items WHERE id = ?1",
                params![id],
                |row| {
                    Ok(ItemRow {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        description: row.get(2)?,
                        column_name: row.get(3)?,
                        position: row.get(4)?,
                        status: row.get(5)?,
                        created_at: row.get(6)?,
                        updated_at: row.get(7)?,
                    })
                },
            )
            .optional()?;
        match row {
            Some(r) => {
                let history = self.get_history(id)?;
                Ok(Some(r.into_item(history)?))
            }
            None => Ok(None),
        }
    }

    pub fn get_history(&self, item_id: i64) -> StoreResult<Vec<HistoryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT from_column, to_column, actor, at FROM item_history
             WHERE item_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![item_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        let mut history = Vec::new();
        for row in rows {
            let (from, to, actor, at) = row?;
            history.push(HistoryEntry {
                from_column: parse_column(&from)?,
                to_column: parse_column(&to)?,
                actor,
                at,
            });
        }
        Ok(history)
    }

    // ── Mutations ─────────────────────────────────────────────────────

    /// Insert a new item at the end of `column`. Returns the item and the
    /// board version after the insert.
    pub fn create_item(
        &self,
        title: &str,
        description: &str,
        column: Column,
    ) -> StoreResult<(WorkItem, i64)> {
        let tx = self.begin_write()?;
        let position = self.max_position(column)? + 1;
        let now = now_ts();
        self.conn.execute(
            "INSERT INTO work_items (title, description, column_name, position, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![title, description, column.as_str(), position, column.status().as_str(), now],
        )?;
        let id = self.conn.last_insert_rowid();
        let version = self.bump_version()?;
        let item = self
            .get_item(id)?
            .ok_or_else(|| BoardError::Other(anyhow!("work item {} missing after insert", id)))?;
        tx.commit()?;
        Ok((item, version))
    }

    /// Move an item, keeping both affected columns gapless.
    ///
    /// Validation happens after the write lock is taken and before the
    /// first write; any error drops the transaction and leaves the store
    /// untouched.
    pub fn apply_move(
        &self,
        id: i64,
        target: Column,
        requested_position: i64,
        actor: Option<&str>,
    ) -> StoreResult<MoveOutcome> {
        self.apply_move_checked(id, target, requested_position, actor, |_| Ok(()))
    }

    /// [`apply_move`](Self::apply_move) with a caller check run against the
    /// item as read under the write lock, so the check and the move see the
    /// same state. An error from `check` aborts the move.
    pub fn apply_move_checked<F>(
        &self,
        id: i64,
        target: Column,
        requested_position: i64,
        actor: Option<&str>,
        check: F,
    ) -> StoreResult<MoveOutcome>
    where
        F: FnOnce(&WorkItem) -> StoreResult<()>,
    {
        let tx = self.begin_write()?;

        let locked = self.get_item(id)?.ok_or(BoardError::ItemNotFound { id })?;
        check(&locked)?;
        let current = Placement::new(locked.column, locked.position);
        let mut others = self.count_in_column(target)?;
        if target == current.column {
            others -= 1;
        }
        let transition = transition::plan(id, current, target, requested_position, others)?;
        let now = now_ts();

        match transition {
            Transition::Noop => {}
            Transition::Reorder { column, from, to } => {
                if to < from {
                    self.conn.execute(
                        "UPDATE work_items SET position = position + 1
                         WHERE column_name = ?1 AND position >= ?2 AND position < ?3",
                        params![column.as_str(), to, from],
                    )?;
                } else {
                    self.conn.execute(
                        "UPDATE work_items SET position = position - 1
                         WHERE column_name = ?1 AND position > ?2 AND position <= ?3",
                        params![column.as_str(), from, to],
                    )?;
                }
                self.conn.execute(
                    "UPDATE work_items SET position = ?1, updated_at = ?2 WHERE id = ?3",
                    params![to, now, id],
                )?;
            }
            Transition::Relocate { from, to } => {
                self.conn.execute(
                    "UPDATE work_items SET position = position - 1
                     WHERE column_name = ?1 AND position > ?2",
                    params![from.column.as_str(), from.position],
                )?;
                self.conn.execute(
                    "UPDATE work_items SET position = position + 1
                     WHERE column_name = ?1 AND position >= ?2",
                    params![to.column.as_str(), to.position],
                )?;
                self.conn.execute(
                    "UPDATE work_items SET column_name = ?1, position = ?2, status = ?3, updated_at = ?4
                     WHERE id = ?5",
                    params![
                        to.column.as_str(),
                        to.position,
                        to.column.status().as_str(),
                        now,
                        id
                    ],
                )?;
                self.append_history(id, from.column, to.column, actor, &now)?;
            }
        }

        let version = if transition == Transition::Noop {
            self.version()?
        } else {
            self.bump_version()?
        };
        let item = self.get_item(id)?.ok_or(BoardError::ItemNotFound { id })?;
        tx.commit()?;

        Ok(MoveOutcome {
            item,
            from: current,
            to: transition.destination(current),
            transition,
            version,
        })
    }

    /// History timestamps never go backwards for an item, even if the wall
    /// clock does.
    fn append_history(
        &self,
        item_id: i64,
        from: Column,
        to: Column,
        actor: Option<&str>,
        now: &str,
    ) -> StoreResult<()> {
        let last: Option<String> = self.conn.query_row(
            "SELECT MAX(at) FROM item_history WHERE item_id = ?1",
            params![item_id],
            |row| row.get(0),
        )?;
        let at = match last {
            Some(last) if last.as_str() > now => last,
            _ => now.to_string(),
        };
        self.conn.execute(
            "INSERT INTO item_history (item_id, from_column, to_column, actor, at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![item_id, from.as_str(), to.as_str(), actor, at],
        )?;
        Ok(())
    }

    /// Delete an item and close the gap it leaves. Returns where the item
    /// was and the new board version, or `None` if it did not exist.
    pub fn delete_item(&self, id: i64) -> StoreResult<Option<(Placement, i64)>> {
        let tx = self.begin_write()?;
        let Some(placement) = self.placement(id)? else {
            return Ok(None);
        };
        self.conn
            .execute("DELETE FROM work_items WHERE id = ?1", params![id])?;
        self.conn.execute(
            "UPDATE work_items SET position = position - 1
             WHERE column_name = ?1 AND position > ?2",
            params![placement.column.as_str(), placement.position],
        )?;
        let version = self.bump_version()?;
        tx.commit()?;
        Ok(Some((placement, version)))
    }

    /// Repack every column to `0..n` and re-derive statuses from columns.
    ///
    /// Repairs the damage an uncoordinated writer can leave behind. Returns
    /// the number of rows changed; the version is bumped only if any were.
    pub fn normalize_positions(&self) -> StoreResult<usize> {
        let tx = self.begin_write()?;
        let mut changed = 0usize;
        for column in Column::ALL {
            let items = self.list_column(column)?;
            for (idx, item) in items.iter().enumerate() {
                let idx = idx as i64;
                if item.position != idx || item.status != column.status() {
                    self.conn.execute(
                        "UPDATE work_items SET position = ?1, status = ?2 WHERE id = ?3",
                        params![idx, column.status().as_str(), item.id],
                    )?;
                    changed += 1;
                }
            }
        }
        if changed > 0 {
            self.bump_version()?;
        }
        tx.commit()?;
        Ok(changed)
    }
}

/// Timestamps are RFC 3339 UTC with microseconds so that they sort
/// lexicographically.
fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_column(s: &str) -> StoreResult<Column> {
    Column::from_str(s)
        .map_err(|_| BoardError::Other(anyhow!("invalid column in database: '{}'", s)))
}

fn parse_status(s: &str) -> StoreResult<WorkStatus> {
    WorkStatus::from_str(s)
        .map_err(|_| BoardError::Other(anyhow!("invalid status in database: '{}'", s)))
}

/// Intermediate row struct for work_items.
struct ItemRow {
    id: i64,
    title: String,
    description: String,
    column_name: String,
    position: i64,
    status: String,
    created_at: String,
    updated_at: String,
}

impl ItemRow {
    fn into_item(self, history: Vec<HistoryEntry>) -> StoreResult<WorkItem> {
        Ok(WorkItem {
            id: self.id,
            title: self.title,
            description: self.description,
            column: parse_column(&self.column_name)?,
            position: self.position,
            status: parse_status(&self.status)?,
            history,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
