//! CLI command implementations.
//!
//! | Module   | Commands handled                 |
//! |----------|----------------------------------|
//! | `serve`  | `Serve`                          |
//! | `board`  | `Init`, `Snapshot`, `Repair`     |
//! | `config` | `Config`                         |

pub mod board;
pub mod config;
pub mod serve;

pub use board::{cmd_init, cmd_repair, cmd_snapshot};
pub use config::cmd_config;
pub use serve::cmd_serve;
