//! Process-wide state handle.
//!
//! [`StateStore`] bundles the task, turn, and artifact stores over one
//! shared [`Database`]. It is the handle injected into the session, the
//! dispatcher, the workers, and tool implementations — there are no
//! ambient globals; whoever constructs the `StateStore` owns the data
//! directory.

use std::path::Path;

use crate::artifact_store::ArtifactStore;
use crate::db::Database;
use crate::error::StoreResult;
use crate::task_store::TaskStore;
use crate::turn_store::TurnStore;

/// Shared handle to the full state substrate. Cheap to clone.
#[derive(Clone)]
pub struct StateStore {
    tasks: TaskStore,
    turns: TurnStore,
    artifacts: ArtifactStore,
}

impl StateStore {
    /// Build a state store over an already-migrated database.
    pub fn new(db: Database) -> Self {
        Self {
            tasks: TaskStore::new(db.clone()),
            turns: TurnStore::new(db.clone()),
            artifacts: ArtifactStore::new(db),
        }
    }

    /// Open (or create) the database at `path` and run migrations.
    pub async fn open(path: impl AsRef<Path> + Send + 'static) -> StoreResult<Self> {
        let db = Database::open_and_migrate(path).await?;
        Ok(Self::new(db))
    }

    /// In-memory store for tests.
    pub async fn in_memory() -> StoreResult<Self> {
        let db = Database::open_in_memory()?;
        db.run_migrations().await?;
        Ok(Self::new(db))
    }

    /// Task operations.
    pub fn tasks(&self) -> &TaskStore {
        &self.tasks
    }

    /// Conversation turn operations.
    pub fn turns(&self) -> &TurnStore {
        &self.turns
    }

    /// Artifact operations.
    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }
}
