//! Shared SQLite handle.
//!
//! One `rusqlite::Connection` serves the whole process, guarded by a
//! mutex and driven from async code through the blocking thread pool.
//! That single guarded connection is deliberate: the claim protocol
//! needs every select-then-update to be invisible to other claimers,
//! and serializing all store work through one lock gives exactly that
//! without row locks or transactions-with-retries.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::migration;

/// Cloneable handle to the process-wide SQLite connection.
///
/// Clones share the connection; dropping the last clone closes it.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create the database file at `path`.
    ///
    /// Blocks for the file open, so do this during startup (or behind
    /// `spawn_blocking`), not from a hot async path.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening state database");
        Self::from_connection(Connection::open(path)?)
    }

    /// Fresh in-memory database, used by tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        debug!("opening in-memory state database");
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Open the file at `path` and bring the schema up to date.
    pub async fn open_and_migrate(path: impl AsRef<Path> + Send + 'static) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let db = tokio::task::spawn_blocking(move || Self::open(&path)).await??;
        db.run_migrations().await?;
        Ok(db)
    }

    /// Apply any schema migrations not yet recorded in this database.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        self.execute(|conn| migration::run_all(conn)).await
    }

    /// Run `f` against the connection on the blocking pool.
    ///
    /// Every read and write in the store crate funnels through here;
    /// the mutex is held for the whole closure, so a closure that does
    /// "find a claimable row, then mark it claimed" is atomic with
    /// respect to every other store call in the process.
    pub async fn execute<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || f(&*lock(&conn)?)).await?
    }

    /// Like [`Database::execute`] but with a `&mut Connection`, for
    /// callers that need `conn.transaction()`.
    pub async fn execute_mut<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || f(&mut *lock(&conn)?)).await?
    }

    // ── setup ────────────────────────────────────────────────────────

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        Self::configure(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Tune the connection for this crate's workload: a small, hot
    /// `tasks` table that the dispatcher re-reads every poll tick while
    /// the session and worker threads update leases and states.
    fn configure(conn: &Connection) -> StoreResult<()> {
        // WAL keeps the per-tick scans from stalling behind lease
        // updates arriving from the other runtime.
        conn.pragma_update(None, "journal_mode", "WAL")?;

        // With WAL, NORMAL only risks the most recent commit on power
        // loss. A lost lease update is recovered by lease expiry, so
        // full fsync-per-commit buys nothing here.
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        // The session runtime and the background loop both reach this
        // file; wait out transient lock contention instead of bubbling
        // SQLITE_BUSY into a failed claim.
        conn.pragma_update(None, "busy_timeout", 5_000_i32)?;

        conn.pragma_update(None, "foreign_keys", "ON")?;

        debug!("state database configured");
        Ok(())
    }
}

fn lock<'a>(conn: &'a Arc<Mutex<Connection>>) -> StoreResult<MutexGuard<'a, Connection>> {
    conn.lock()
        .map_err(|e| StoreError::TaskJoin(format!("connection lock poisoned: {e}")))
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn execute_runs_closures_against_the_shared_connection() {
        let db = Database::open_in_memory().unwrap();
        let answer: i64 = db
            .execute(|conn| {
                let n: i64 = conn.query_row("SELECT 40 + 2", [], |row| row.get(0))?;
                Ok(n)
            })
            .await
            .unwrap();
        assert_eq!(answer, 42);
    }

    #[tokio::test]
    async fn clones_see_each_other_writes() {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        let other = db.clone();

        db.execute(|conn| {
            conn.execute(
                "INSERT INTO artifacts (artifact_id, media_type, body, metadata, created_at) \
                 VALUES ('a1', 'text/plain', 'body', '{}', 0)",
                [],
            )?;
            Ok(())
        })
        .await
        .unwrap();

        let count: i64 = other
            .execute(|conn| {
                let c: i64 =
                    conn.query_row("SELECT count(*) FROM artifacts", [], |row| row.get(0))?;
                Ok(c)
            })
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn migrations_create_the_schema_once() {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        // A second run must be a no-op, not a CREATE TABLE failure.
        db.run_migrations().await.unwrap();

        let count: i64 = db
            .execute(|conn| {
                let c: i64 = conn.query_row("SELECT count(*) FROM tasks", [], |row| row.get(0))?;
                Ok(c)
            })
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
