//! Workflow board: ordered pipeline stages with live fan-out.
//!
//! ## Overview
//!
//! Work items live in a SQLite record store, one row per item with a
//! column and a gapless position. Every placement change goes through the
//! move coordinator, which commits in a single store transaction, refreshes
//! the cached board snapshot and emits a mutation event. The fan-out hub
//! turns those events into `delta`, `full_snapshot` and `count_update`
//! frames for WebSocket subscribers.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, warm-up, shutdown)     │
//! │          │ <─────── │    ├─ api.rs  (route handlers, AppState)         │
//! └──────────┘ WebSocket│    └─ ws.rs   (socket loop, keepalive)           │
//!                       │         │                                        │
//!                       │         │ MoveCoordinator::move_item()           │
//!                       │         v                                        │
//!                       │  coordinator.rs ── transition::plan()            │
//!                       │         │     └─── db.rs  (BoardDb, DbHandle)    │
//!                       │         │                                        │
//!                       │         │ BoardCache::refresh() → rebuild()      │
//!                       │         │ MutationEvent (broadcast)              │
//!                       │         v                                        │
//!                       │  fanout.rs  (FanoutHub, mutation pump)           │
//!                       │         └─ counter.rs (CounterCache)             │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module        | Responsibility                                          |
//! |---------------|---------------------------------------------------------|
//! | `models`      | `Column`, `WorkItem`, `BoardSnapshot`, `Principal`      |
//! | `transition`  | Pure move planning: terminal rule, clamping, no-ops     |
//! | `rebuild`     | Canonical snapshot from the record store                |
//! | `cache`       | `CacheBackend` trait + bounded in-memory TTL cache      |
//! | `board_cache` | Versioned board snapshot cache                          |
//! | `authz`       | `Authorizer` trait, role-based default                  |
//!
//! ## Typical Request Flow (move item → "In Progress")
//!
//! 1. `PATCH /api/items/{id}/move` → `api::move_item()`
//! 2. The coordinator parses the column, checks `Authorizer::can_move`,
//!    then runs `BoardDb::apply_move` under `BEGIN IMMEDIATE`.
//! 3. Inside the transaction the current placement is read, the move is
//!    planned, siblings in both columns are shifted, status is re-derived
//!    and a history entry is appended.
//! 4. After commit the board cache is invalidated and rebuilt, and a
//!    `MutationEvent::Moved` is broadcast.
//! 5. The mutation pump publishes a `delta` to `workflow` subscribers and
//!    refreshed counts to `appointments` subscribers.

pub mod api;
pub mod authz;
pub mod board_cache;
pub mod cache;
pub mod coordinator;
pub mod counter;
pub mod db;
pub mod fanout;
pub mod models;
pub mod rebuild;
pub mod server;
pub mod transition;
pub mod ws;
