use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::BoardError;

/// A pipeline stage on the workflow board.
///
/// The declaration order is the board order; `Completed` is terminal.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    #[default]
    Estimates,
    InProgress,
    WaitingParts,
    Completed,
}

impl Column {
    /// Every column in board order.
    pub const ALL: [Column; 4] = [
        Column::Estimates,
        Column::InProgress,
        Column::WaitingParts,
        Column::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Estimates => "estimates",
            Self::InProgress => "in_progress",
            Self::WaitingParts => "waiting_parts",
            Self::Completed => "completed",
        }
    }

    /// No outgoing transition is permitted from a terminal column.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Status that an item takes on when it lands in this column.
    pub fn status(&self) -> WorkStatus {
        match self {
            Self::Estimates => WorkStatus::Pending,
            Self::InProgress | Self::WaitingParts => WorkStatus::InProgress,
            Self::Completed => WorkStatus::Completed,
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Column {
    type Err = BoardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "estimates" => Ok(Self::Estimates),
            "in_progress" => Ok(Self::InProgress),
            "waiting_parts" => Ok(Self::WaitingParts),
            "completed" => Ok(Self::Completed),
            _ => Err(BoardError::InvalidColumn {
                column: s.to_string(),
            }),
        }
    }
}

/// Status derived from an item's column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    Pending,
    InProgress,
    Completed,
}

impl WorkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            _ => Err(format!("Invalid work status: {}", s)),
        }
    }
}

/// One column transition in an item's history log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub from_column: Column,
    pub to_column: Column,
    pub actor: Option<String>,
    pub at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub column: Column,
    pub position: i64,
    pub status: WorkStatus,
    pub history: Vec<HistoryEntry>,
    pub created_at: String,
    pub updated_at: String,
}

/// Denormalized card data carried in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSummary {
    pub id: i64,
    pub title: String,
    pub status: WorkStatus,
    pub position: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSnapshot {
    pub column: Column,
    pub items: Vec<ItemSummary>,
}

/// Point-in-time materialization of the board.
///
/// `version` is the record store's board version the snapshot was built
/// from. Columns appear in [`Column::ALL`] order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardSnapshot {
    pub version: i64,
    pub columns: Vec<ColumnSnapshot>,
}

impl BoardSnapshot {
    /// A snapshot with every column present and empty.
    pub fn empty(version: i64) -> Self {
        Self {
            version,
            columns: Column::ALL
                .iter()
                .map(|c| ColumnSnapshot {
                    column: *c,
                    items: Vec::new(),
                })
                .collect(),
        }
    }

    pub fn column(&self, column: Column) -> &[ItemSummary] {
        self.columns
            .iter()
            .find(|c| c.column == column)
            .map(|c| c.items.as_slice())
            .unwrap_or(&[])
    }

    /// Item ids of one column in board order.
    pub fn ids(&self, column: Column) -> Vec<i64> {
        self.column(column).iter().map(|i| i.id).collect()
    }

    pub fn item_count(&self) -> usize {
        self.columns.iter().map(|c| c.items.len()).sum()
    }

    /// Check the partition and ordering invariants.
    ///
    /// Every id must appear once across the board, columns must be in board
    /// order, and positions inside each column must be exactly `0..n`.
    pub fn check_invariants(&self) -> Result<(), String> {
        let order: Vec<Column> = self.columns.iter().map(|c| c.column).collect();
        if order != Column::ALL {
            return Err(format!("columns out of board order: {:?}", order));
        }

        let mut seen = std::collections::HashSet::new();
        for col in &self.columns {
            for (idx, item) in col.items.iter().enumerate() {
                if !seen.insert(item.id) {
                    return Err(format!("item {} appears more than once", item.id));
                }
                if item.position != idx as i64 {
                    return Err(format!(
                        "item {} in '{}' has position {} at index {}",
                        item.id, col.column, item.position, idx
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Role of the caller as asserted by the upstream gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Staff,
    Customer,
}

impl Role {
    pub fn is_shop_member(&self) -> bool {
        matches!(self, Self::Owner | Self::Staff)
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "owner" => Ok(Self::Owner),
            "staff" => Ok(Self::Staff),
            "customer" => Ok(Self::Customer),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub name: String,
    pub role: Role,
}

impl Principal {
    pub fn new(name: impl Into<String>, role: Role) -> Self {
        Self {
            name: name.into(),
            role,
        }
    }

    pub fn anonymous() -> Self {
        Self::new("anonymous", Role::Customer)
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
