//! Versioned schema setup.
//!
//! Each schema change ships as a numbered SQL batch; the versions
//! already applied to a database are recorded in its `_migrations`
//! table, so opening an existing file replays only what it is missing
//! and opening it twice replays nothing.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};

/// One numbered schema change.
struct Migration {
    /// Position in the sequence; never reused or reordered.
    version: u32,
    /// What this change introduces, for the log line.
    description: &'static str,
    /// The SQL batch, executed statement by statement.
    sql: &'static str,
}

/// The full sequence. New entries go at the end with the next version.
static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "initial schema — tasks, turns, artifacts",
    sql: r#"
        CREATE TABLE tasks (
            task_id          TEXT PRIMARY KEY,
            task_type        TEXT NOT NULL,
            payload          TEXT NOT NULL DEFAULT '{}',
            state            TEXT NOT NULL CHECK(state IN ('queued','running','done','failed')),
            artifact_refs    TEXT NOT NULL DEFAULT '[]',
            claimed_by       TEXT,
            claim_expires_at INTEGER,
            created_at       INTEGER NOT NULL,
            updated_at       INTEGER NOT NULL
        );
        CREATE INDEX idx_tasks_type_state ON tasks(task_type, state);

        CREATE TABLE turns (
            turn_id           TEXT PRIMARY KEY,
            conversation_id   TEXT NOT NULL,
            user_message      TEXT NOT NULL,
            assistant_message TEXT,
            artifacts         TEXT NOT NULL DEFAULT '[]',
            metadata          TEXT NOT NULL DEFAULT '{}',
            related_task_id   TEXT,
            created_at        INTEGER NOT NULL,
            updated_at        INTEGER NOT NULL
        );
        CREATE INDEX idx_turns_conversation ON turns(conversation_id, created_at);

        CREATE TABLE artifacts (
            artifact_id TEXT PRIMARY KEY,
            media_type  TEXT NOT NULL,
            body        TEXT NOT NULL,
            metadata    TEXT NOT NULL DEFAULT '{}',
            created_at  INTEGER NOT NULL
        );
    "#,
}];

/// Bring the schema behind `conn` up to the latest version.
pub fn run_all(conn: &Connection) -> StoreResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version    INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |row| {
            row.get(0)
        })?;

    for migration in MIGRATIONS {
        if migration.version <= current {
            debug!(version = migration.version, "migration already applied");
            continue;
        }

        info!(
            version = migration.version,
            description = migration.description,
            "applying migration"
        );

        conn.execute_batch(migration.sql)
            .map_err(|e| StoreError::Migration {
                version: migration.version,
                message: e.to_string(),
            })?;

        conn.execute(
            "INSERT INTO _migrations (version, applied_at) VALUES (?1, ?2)",
            rusqlite::params![migration.version, chrono::Utc::now().timestamp_millis()],
        )?;
    }

    Ok(())
}
