//! Conversation turn journal.
//!
//! A turn pairs one user message with the assistant message that answered
//! it. The session appends the user half before running the main-path
//! runner and fills in the assistant half afterwards, so a crash mid-run
//! leaves an honest record of what was asked but never answered.

use rusqlite::OptionalExtension;
use serde_json::Value;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::db::Database;
use crate::error::StoreResult;
use crate::task::now_ms;

/// A single conversation journal entry.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Turn {
    /// Unique identifier (UUID v7).
    pub turn_id: String,
    /// The conversation this turn belongs to.
    pub conversation_id: String,
    /// What the user said.
    pub user_message: String,
    /// What the assistant answered, once known.
    pub assistant_message: Option<String>,
    /// Artifact ids attached to the assistant message.
    pub artifacts: Vec<String>,
    /// Free-form metadata (e.g. the final task state).
    pub metadata: Value,
    /// The task that produced this turn, if any.
    pub related_task_id: Option<String>,
    /// Unix milliseconds when the turn was created.
    pub created_at: i64,
    /// Unix milliseconds when the turn was last updated.
    pub updated_at: i64,
}

/// Append/update/list operations on conversation turns.
#[derive(Clone)]
pub struct TurnStore {
    db: Database,
}

impl TurnStore {
    /// Create a new turn store backed by `db`.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a user turn with no assistant message yet.
    #[instrument(skip(self, user_message))]
    pub async fn append_user(
        &self,
        conversation_id: &str,
        user_message: &str,
        related_task_id: Option<&str>,
    ) -> StoreResult<Turn> {
        let turn_id = Uuid::now_v7().to_string();
        let conversation_id = conversation_id.to_string();
        let user_message = user_message.to_string();
        let related_task_id = related_task_id.map(str::to_string);
        let now = now_ms();

        let turn = Turn {
            turn_id: turn_id.clone(),
            conversation_id: conversation_id.clone(),
            user_message: user_message.clone(),
            assistant_message: None,
            artifacts: Vec::new(),
            metadata: Value::Object(Default::default()),
            related_task_id: related_task_id.clone(),
            created_at: now,
            updated_at: now,
        };

        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO turns (turn_id, conversation_id, user_message, related_task_id, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                    rusqlite::params![turn_id, conversation_id, user_message, related_task_id, now],
                )?;
                Ok(())
            })
            .await?;

        debug!(turn_id = %turn.turn_id, conversation = %turn.conversation_id, "user turn appended");
        Ok(turn)
    }

    /// Set the assistant half of an existing turn.
    ///
    /// Returns `None` if the turn does not exist.
    #[instrument(skip(self, assistant_message, artifacts, metadata))]
    pub async fn set_assistant(
        &self,
        turn_id: &str,
        assistant_message: &str,
        artifacts: Vec<String>,
        metadata: Value,
    ) -> StoreResult<Option<Turn>> {
        let turn_id = turn_id.to_string();
        let assistant_message = assistant_message.to_string();
        let artifacts_json = serde_json::to_string(&artifacts)?;
        let metadata_json = serde_json::to_string(&metadata)?;
        let now = now_ms();

        self.db
            .execute(move |conn| {
                let updated = conn.execute(
                    "UPDATE turns SET assistant_message = ?2, artifacts = ?3, metadata = ?4, \
                     updated_at = ?5 WHERE turn_id = ?1",
                    rusqlite::params![turn_id, assistant_message, artifacts_json, metadata_json, now],
                )?;
                if updated == 0 {
                    return Ok(None);
                }
                query_turn_by_id(conn, &turn_id)
            })
            .await
    }

    /// Return the last `limit` turns of a conversation in chronological
    /// order, newest last.
    #[instrument(skip(self))]
    pub async fn list_recent(&self, conversation_id: &str, limit: i64) -> StoreResult<Vec<Turn>> {
        let conversation_id = conversation_id.to_string();
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {TURN_COLUMNS} \
                     FROM (SELECT *, rowid FROM turns WHERE conversation_id = ?1 \
                           ORDER BY created_at DESC, rowid DESC LIMIT ?2) \
                     ORDER BY created_at ASC, rowid ASC"
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![conversation_id, limit], turn_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows.into_iter().map(TurnRow::into_turn).collect()
            })
            .await
    }
}

// ── row mapping ──────────────────────────────────────────────────────

const TURN_COLUMNS: &str = "turn_id, conversation_id, user_message, assistant_message, \
                            artifacts, metadata, related_task_id, created_at, updated_at";

struct TurnRow {
    turn_id: String,
    conversation_id: String,
    user_message: String,
    assistant_message: Option<String>,
    artifacts: String,
    metadata: String,
    related_task_id: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl TurnRow {
    fn into_turn(self) -> StoreResult<Turn> {
        Ok(Turn {
            turn_id: self.turn_id,
            conversation_id: self.conversation_id,
            user_message: self.user_message,
            assistant_message: self.assistant_message,
            artifacts: serde_json::from_str(&self.artifacts)?,
            metadata: serde_json::from_str(&self.metadata)?,
            related_task_id: self.related_task_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn turn_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TurnRow> {
    Ok(TurnRow {
        turn_id: row.get(0)?,
        conversation_id: row.get(1)?,
        user_message: row.get(2)?,
        assistant_message: row.get(3)?,
        artifacts: row.get(4)?,
        metadata: row.get(5)?,
        related_task_id: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn query_turn_by_id(conn: &rusqlite::Connection, turn_id: &str) -> StoreResult<Option<Turn>> {
    let row = conn
        .query_row(
            &format!("SELECT {TURN_COLUMNS} FROM turns WHERE turn_id = ?1"),
            rusqlite::params![turn_id],
            turn_row,
        )
        .optional()?;
    row.map(TurnRow::into_turn).transpose()
}

// ── tests ────────────────────────────────────────────────────────────
