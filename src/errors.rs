//! Typed error hierarchy for the workflow board.
//!
//! `BoardError` is the single error type returned by the board core
//! (record store, caches, move coordinator, fan-out). Validation errors are
//! raised before any write; `Contention` is the only retryable kind.

use thiserror::Error;

use crate::board::models::Column;

/// Errors from the workflow board subsystem.
#[derive(Debug, Error)]
pub enum BoardError {
    #[error("Work item {id} not found")]
    ItemNotFound { id: i64 },

    #[error("Invalid column '{column}': expected one of estimates, in_progress, waiting_parts, completed")]
    InvalidColumn { column: String },

    #[error("Work item {id} is in terminal column '{column}' and cannot move to '{target}'")]
    TerminalStateViolation {
        id: i64,
        column: Column,
        target: Column,
    },

    #[error("Board is busy, retry later: {0}")]
    Contention(String),

    #[error("Record store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Board cache rebuild failed: {0}")]
    CacheRebuildFailure(String),

    #[error("'{principal}' is not allowed to {action}")]
    Forbidden { principal: String, action: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BoardError {
    /// Whether the caller may retry the same request after a backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BoardError::Contention(_))
    }

    /// Stable, machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            BoardError::ItemNotFound { .. } => "not_found",
            BoardError::InvalidColumn { .. } => "invalid_column",
            BoardError::TerminalStateViolation { .. } => "terminal_state_violation",
            BoardError::Contention(_) => "contention",
            BoardError::StoreUnavailable(_) => "store_unavailable",
            BoardError::CacheRebuildFailure(_) => "cache_rebuild_failure",
            BoardError::Forbidden { .. } => "forbidden",
            BoardError::InvalidRequest(_) => "invalid_request",
            BoardError::Other(_) => "internal",
        }
    }
}

impl From<rusqlite::Error> for BoardError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match &err {
            rusqlite::Error::SqliteFailure(e, _) => match e.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                    BoardError::Contention(err.to_string())
                }
                ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure
                | ErrorCode::NotADatabase
                | ErrorCode::DatabaseCorrupt
                | ErrorCode::PermissionDenied
                | ErrorCode::ReadOnly => BoardError::StoreUnavailable(err.to_string()),
                _ => BoardError::Other(anyhow::Error::new(err).context("Record store query failed")),
            },
            _ => BoardError::Other(anyhow::Error::new(err).context("Record store query failed")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_failure(code: i32) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(code), None)
    }

    #[test]
    fn busy_and_locked_map_to_contention() {
        let busy: BoardError = sqlite_failure(rusqlite::ffi::SQLITE_BUSY).into();
        let locked: BoardError = sqlite_failure(rusqlite::ffi::SQLITE_LOCKED).into();
        assert!(matches!(busy, BoardError::Contention(_)));
        assert!(matches!(locked, BoardError::Contention(_)));
        assert!(busy.is_retryable());
    }

    #[test]
    fn cannot_open_maps_to_store_unavailable() {
        let err: BoardError = sqlite_failure(rusqlite::ffi::SQLITE_CANTOPEN).into();
        assert!(matches!(err, BoardError::StoreUnavailable(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn other_sqlite_errors_are_internal() {
        let err: BoardError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, BoardError::Other(_)));
        assert_eq!(err.kind(), "internal");
    }

    #[test]
    fn terminal_violation_names_both_columns() {
        let err = BoardError::TerminalStateViolation {
            id: 7,
            column: Column::Completed,
            target: Column::Estimates,
        };
        let msg = err.to_string();
        assert!(msg.contains("7"));
        assert!(msg.contains("completed"));
        assert!(msg.contains("estimates"));
        assert_eq!(err.kind(), "terminal_state_violation");
    }

    #[test]
    fn only_contention_is_retryable() {
        let errors = [
            BoardError::ItemNotFound { id: 1 },
            BoardError::InvalidColumn { column: "nope".into() },
            BoardError::StoreUnavailable("down".into()),
            BoardError::CacheRebuildFailure("x".into()),
            BoardError::InvalidRequest("bad".into()),
        ];
        for err in &errors {
            assert!(!err.is_retryable(), "{} should not be retryable", err.kind());
        }
    }

    #[test]
    fn board_error_implements_std_error() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&BoardError::Contention("busy".into()));
    }
}
