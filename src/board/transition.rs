//! Pure move planning.
//!
//! [`plan`] decides what a requested move means for the board before any row
//! is touched: it enforces the terminal-column rule, clamps the requested
//! position into range and recognises no-op moves. The record store applies
//! the resulting [`Transition`] inside its transaction.

use serde::{Deserialize, Serialize};

use super::models::Column;
use crate::errors::BoardError;

/// Where an item sits on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub column: Column,
    pub position: i64,
}

impl Placement {
    pub fn new(column: Column, position: i64) -> Self {
        Self { column, position }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Target equals the current placement.
    Noop,
    /// Same column, different position.
    Reorder { column: Column, from: i64, to: i64 },
    /// Different column.
    Relocate { from: Placement, to: Placement },
}

impl Transition {
    pub fn destination(&self, current: Placement) -> Placement {
        match *self {
            Transition::Noop => current,
            Transition::Reorder { column, to, .. } => Placement::new(column, to),
            Transition::Relocate { to, .. } => to,
        }
    }

    pub fn changes_column(&self) -> bool {
        matches!(self, Transition::Relocate { .. })
    }
}

/// Plan the move of item `id` from `current` to `target` at `requested`.
///
/// `others_in_target` is the number of items in the target column not
/// counting the moving item, so the valid destinations are
/// `0..=others_in_target`. Out-of-range positions are clamped; a position
/// past the end appends.
pub fn plan(
    id: i64,
    current: Placement,
    target: Column,
    requested: i64,
    others_in_target: i64,
) -> Result<Transition, BoardError> {
    if current.column.is_terminal() && target != current.column {
        return Err(BoardError::TerminalStateViolation {
            id,
            column: current.column,
            target,
        });
    }

    let to = requested.clamp(0, others_in_target.max(0));

    if target == current.column {
        if to == current.position {
            return Ok(Transition::Noop);
        }
        return Ok(Transition::Reorder {
            column: target,
            from: current.position,
            to,
        });
    }

    Ok(Transition::Relocate {
        from: current,
        to: Placement::new(target, to),
    })
}
