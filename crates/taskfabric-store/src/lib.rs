//! # taskfabric-store
//!
//! State substrate for the taskfabric execution fabric.
//!
//! Provides SQLite-backed persistence (WAL mode, versioned migrations)
//! for the three kinds of durable state the fabric relies on:
//!
//! - **Tasks** — the scheduled units of work, with the atomic
//!   claim/lease protocol that guarantees at-most-one concurrent
//!   execution per task.
//! - **Turns** — the conversation journal for the synchronous main path.
//! - **Artifacts** — opaque bodies produced by runs, with idempotent
//!   named writes and a seam for an external ranked search index.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  StateStore (shared process handle)      │
//! ├─────────────────────────────────────────┤
//! │  TaskStore      (claim / lease / retry)  │
//! │  TurnStore      (conversation journal)   │
//! │  ArtifactStore  (bodies + search seam)   │
//! ├─────────────────────────────────────────┤
//! │  Database (rusqlite WAL, spawn_blocking) │
//! │  Migrations (versioned, idempotent)      │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Every operation runs as one closure while the connection mutex is
//! held, which is what makes `TaskStore::claim` a single linearization
//! point across all concurrent claimers.

pub mod artifact_store;
pub mod db;
pub mod error;
pub mod migration;
pub mod state;
pub mod task;
pub mod task_store;
pub mod turn_store;

// ── re-exports ───────────────────────────────────────────────────────

pub use artifact_store::{Artifact, ArtifactIndex, ArtifactStore};
pub use db::Database;
pub use error::{StoreError, StoreResult};
pub use state::StateStore;
pub use task::{
    NotificationPayload, Task, TaskState, UserRequestPayload, WorkPayload, kind,
};
pub use task_store::{TaskFilter, TaskPatch, TaskStore};
pub use turn_store::{Turn, TurnStore};
