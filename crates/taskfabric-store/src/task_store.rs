//! Task persistence with atomic claim/lease semantics.
//!
//! The task store is the single linearization point of the execution
//! fabric: [`TaskStore::claim`] atomically selects and leases a task so
//! that no two workers ever run the same task concurrently. All operations
//! are total — missing rows yield `Ok(None)` rather than an error — and
//! terminal states (`done`, `failed`) are never transitioned out of by
//! [`TaskStore::complete`] or [`TaskStore::fail`].

use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::db::Database;
use crate::error::{StoreError, StoreResult};
use crate::task::{Task, TaskState, now_ms};

const TASK_COLUMNS: &str = "task_id, task_type, payload, state, artifact_refs, \
                            claimed_by, claim_expires_at, created_at, updated_at";

// ═══════════════════════════════════════════════════════════════════════
//  Filter and patch types
// ═══════════════════════════════════════════════════════════════════════

/// Equality filter over task attributes, used by [`TaskStore::claim`].
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Match a specific task id.
    pub task_id: Option<String>,
    /// Match a task type.
    pub task_type: Option<String>,
    /// Match a lifecycle state.
    pub state: Option<TaskState>,
}

impl TaskFilter {
    /// Filter by task id.
    pub fn by_id(task_id: impl Into<String>) -> Self {
        Self {
            task_id: Some(task_id.into()),
            ..Self::default()
        }
    }

    /// Filter by task type.
    pub fn by_type(task_type: impl Into<String>) -> Self {
        Self {
            task_type: Some(task_type.into()),
            ..Self::default()
        }
    }
}

/// Partial update applied by [`TaskStore::update`].
///
/// `payload` is deep-merged into the existing payload: object-valued keys
/// merge recursively, everything else replaces. The double-`Option` lease
/// fields distinguish "leave unchanged" (`None`) from "clear" (`Some(None)`).
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    /// New lifecycle state.
    pub state: Option<TaskState>,
    /// Payload patch, deep-merged.
    pub payload: Option<Value>,
    /// Replacement artifact reference list.
    pub artifact_refs: Option<Vec<String>>,
    /// Set or clear the claimer.
    pub claimed_by: Option<Option<String>>,
    /// Set or clear the lease expiry (unix milliseconds).
    pub claim_expires_at: Option<Option<i64>>,
}

impl TaskPatch {
    /// A patch that clears both lease fields.
    pub fn clear_lease() -> Self {
        Self {
            claimed_by: Some(None),
            claim_expires_at: Some(None),
            ..Self::default()
        }
    }
}

/// Deep-merge `patch` into `target`: objects merge key-by-key recursively,
/// any other value replaces wholesale.
pub(crate) fn merge_patch(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target_map), Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                match target_map.get_mut(&key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge_patch(existing, value);
                    }
                    _ => {
                        target_map.insert(key, value);
                    }
                }
            }
        }
        (target_slot, patch_value) => *target_slot = patch_value,
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  TaskStore
// ═══════════════════════════════════════════════════════════════════════

/// Task CRUD plus the atomic claim protocol.
#[derive(Clone)]
pub struct TaskStore {
    db: Database,
}

impl TaskStore {
    /// Create a new task store backed by `db`.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a task in `queued` state and return the stored record.
    #[instrument(skip(self, payload))]
    pub async fn create(&self, task_type: &str, payload: Value) -> StoreResult<Task> {
        let task_id = Uuid::now_v7().to_string();
        let task_type = task_type.to_string();
        let now = now_ms();

        let task = Task {
            task_id: task_id.clone(),
            task_type: task_type.clone(),
            payload: payload.clone(),
            state: TaskState::Queued,
            artifact_refs: Vec::new(),
            claimed_by: None,
            claim_expires_at: None,
            created_at: now,
            updated_at: now,
        };

        let payload_json = serde_json::to_string(&payload)?;
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO tasks (task_id, task_type, payload, state, artifact_refs, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, 'queued', '[]', ?4, ?4)",
                    rusqlite::params![task_id, task_type, payload_json, now],
                )?;
                Ok(())
            })
            .await?;

        debug!(task_id = %task.task_id, task_type = %task.task_type, "task created");
        Ok(task)
    }

    /// Fetch a single task by id, returning `None` if not found.
    #[instrument(skip(self))]
    pub async fn get(&self, task_id: &str) -> StoreResult<Option<Task>> {
        let task_id = task_id.to_string();
        self.db
            .execute(move |conn| query_task_by_id(conn, &task_id))
            .await
    }

    /// Apply a partial update and return the updated task.
    ///
    /// Returns `None` if the task does not exist. The payload patch is
    /// deep-merged; `updated_at` is refreshed on any change.
    #[instrument(skip(self, patch))]
    pub async fn update(&self, task_id: &str, patch: TaskPatch) -> StoreResult<Option<Task>> {
        let task_id = task_id.to_string();
        self.db
            .execute(move |conn| {
                let Some(mut task) = query_task_by_id(conn, &task_id)? else {
                    return Ok(None);
                };

                if let Some(state) = patch.state {
                    task.state = state;
                }
                if let Some(payload_patch) = patch.payload {
                    merge_patch(&mut task.payload, payload_patch);
                }
                if let Some(refs) = patch.artifact_refs {
                    task.artifact_refs = refs;
                }
                if let Some(claimed_by) = patch.claimed_by {
                    task.claimed_by = claimed_by;
                }
                if let Some(expires) = patch.claim_expires_at {
                    task.claim_expires_at = expires;
                }
                task.updated_at = now_ms();

                write_task_fields(conn, &task)?;
                Ok(Some(task))
            })
            .await
    }

    /// List tasks, optionally filtered by type and state, oldest first.
    #[instrument(skip(self))]
    pub async fn list(
        &self,
        task_type: Option<&str>,
        state: Option<TaskState>,
    ) -> StoreResult<Vec<Task>> {
        let task_type = task_type.map(str::to_string);
        let state = state.map(TaskState::as_str);
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks \
                     WHERE (?1 IS NULL OR task_type = ?1) AND (?2 IS NULL OR state = ?2) \
                     ORDER BY created_at, rowid"
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![task_type, state], task_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows.into_iter().map(TaskRow::into_task).collect()
            })
            .await
    }

    /// Atomically claim the first task matching `filter`.
    ///
    /// A task is claimable when its state is `queued` or `running` and it
    /// carries no lease or an expired one. On success the task is moved to
    /// `running` with `claimed_by = claimer_id` and a lease of `ttl_seconds`.
    /// Returns `None` when no candidate matched.
    ///
    /// Candidates are considered oldest first. Note that a recurring task
    /// that was rescheduled reuses its original row, so a previously
    /// completed-looking id can legitimately be claimed again once it is
    /// back in `queued`.
    #[instrument(skip(self, filter))]
    pub async fn claim(
        &self,
        filter: &TaskFilter,
        claimer_id: &str,
        ttl_seconds: i64,
    ) -> StoreResult<Option<Task>> {
        let filter = filter.clone();
        let claimer_id = claimer_id.to_string();
        self.db
            .execute(move |conn| {
                let now = now_ms();
                let mut stmt = conn.prepare(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks \
                     WHERE state IN ('queued','running') \
                       AND (claimed_by IS NULL OR claim_expires_at IS NULL OR claim_expires_at <= ?1) \
                       AND (?2 IS NULL OR task_id = ?2) \
                       AND (?3 IS NULL OR task_type = ?3) \
                       AND (?4 IS NULL OR state = ?4) \
                     ORDER BY created_at, rowid \
                     LIMIT 1"
                ))?;
                let row = stmt
                    .query_row(
                        rusqlite::params![
                            now,
                            filter.task_id,
                            filter.task_type,
                            filter.state.map(TaskState::as_str),
                        ],
                        task_row,
                    )
                    .optional()?;

                let Some(row) = row else {
                    return Ok(None);
                };
                let mut task = row.into_task()?;

                task.claimed_by = Some(claimer_id.clone());
                task.claim_expires_at = Some(now + ttl_seconds * 1_000);
                task.state = TaskState::Running;
                task.updated_at = now;
                write_task_fields(conn, &task)?;

                debug!(task_id = %task.task_id, claimer = %claimer_id, "task claimed");
                Ok(Some(task))
            })
            .await
    }

    /// Mark a task `done` and clear its lease.
    ///
    /// Returns `None` if the task is missing or already terminal — a task
    /// never leaves `done` or `failed` through this method.
    #[instrument(skip(self))]
    pub async fn complete(&self, task_id: &str) -> StoreResult<Option<Task>> {
        let task_id = task_id.to_string();
        self.db
            .execute(move |conn| {
                let updated = conn.execute(
                    "UPDATE tasks SET state = 'done', claimed_by = NULL, claim_expires_at = NULL, \
                     updated_at = ?2 WHERE task_id = ?1 AND state NOT IN ('done','failed')",
                    rusqlite::params![task_id, now_ms()],
                )?;
                if updated == 0 {
                    return Ok(None);
                }
                query_task_by_id(conn, &task_id)
            })
            .await
    }

    /// Mark a task `failed`, clear its lease, and merge `{error: ...}` into
    /// the payload.
    ///
    /// Returns `None` if the task is missing or already terminal.
    #[instrument(skip(self, error))]
    pub async fn fail(&self, task_id: &str, error: Value) -> StoreResult<Option<Task>> {
        let task_id = task_id.to_string();
        self.db
            .execute(move |conn| {
                let Some(mut task) = query_task_by_id(conn, &task_id)? else {
                    return Ok(None);
                };
                if task.state.is_terminal() {
                    warn!(task_id = %task.task_id, state = %task.state, "fail on terminal task ignored");
                    return Ok(None);
                }

                merge_patch(
                    &mut task.payload,
                    serde_json::json!({ "error": error }),
                );
                task.state = TaskState::Failed;
                task.claimed_by = None;
                task.claim_expires_at = None;
                task.updated_at = now_ms();
                write_task_fields(conn, &task)?;
                Ok(Some(task))
            })
            .await
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Internal row mapping
// ═══════════════════════════════════════════════════════════════════════

/// Raw row data from SQLite before JSON deserialization.
///
/// Keeps the `rusqlite` row-mapping closure simple (no fallible JSON
/// parsing inside `|row| { ... }`), then converts to `Task` in a second
/// step where we can return `StoreError::Json`.
struct TaskRow {
    task_id: String,
    task_type: String,
    payload: String,
    state: String,
    artifact_refs: String,
    claimed_by: Option<String>,
    claim_expires_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl TaskRow {
    fn into_task(self) -> StoreResult<Task> {
        let state = TaskState::parse(&self.state).ok_or_else(|| {
            StoreError::InvalidArgument(format!("unknown task state `{}`", self.state))
        })?;
        Ok(Task {
            task_id: self.task_id,
            task_type: self.task_type,
            payload: serde_json::from_str(&self.payload)?,
            state,
            artifact_refs: serde_json::from_str(&self.artifact_refs)?,
            claimed_by: self.claimed_by,
            claim_expires_at: self.claim_expires_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn task_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskRow> {
    Ok(TaskRow {
        task_id: row.get(0)?,
        task_type: row.get(1)?,
        payload: row.get(2)?,
        state: row.get(3)?,
        artifact_refs: row.get(4)?,
        claimed_by: row.get(5)?,
        claim_expires_at: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn query_task_by_id(conn: &Connection, task_id: &str) -> StoreResult<Option<Task>> {
    let row = conn
        .query_row(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE task_id = ?1"),
            rusqlite::params![task_id],
            task_row,
        )
        .optional()?;
    row.map(TaskRow::into_task).transpose()
}

/// Persist every mutable task field back to its row.
fn write_task_fields(conn: &Connection, task: &Task) -> StoreResult<()> {
    let payload = serde_json::to_string(&task.payload)?;
    let artifact_refs = serde_json::to_string(&task.artifact_refs)?;
    conn.execute(
        "UPDATE tasks SET payload = ?2, state = ?3, artifact_refs = ?4, claimed_by = ?5, \
         claim_expires_at = ?6, updated_at = ?7 WHERE task_id = ?1",
        rusqlite::params![
            task.task_id,
            payload,
            task.state.as_str(),
            artifact_refs,
            task.claimed_by,
            task.claim_expires_at,
            task.updated_at,
        ],
    )?;
    Ok(())
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[path = "task_store_tests.rs"]
mod tests;
