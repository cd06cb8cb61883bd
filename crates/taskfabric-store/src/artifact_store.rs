//! Artifact persistence and content search.
//!
//! Artifacts are opaque text bodies with a media type and metadata.
//! `write_named` is an idempotent replace so tools can maintain stable
//! documents (a report regenerated every night keeps one id).
//!
//! Ranked content search is delegated to an external index through the
//! [`ArtifactIndex`] trait — the store only promises "given a query,
//! return ranked artifact ids". The built-in [`ArtifactStore::search`]
//! is a plain keyword fallback for deployments without an index.

use rusqlite::OptionalExtension;
use serde_json::Value;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::db::Database;
use crate::error::StoreResult;
use crate::task::now_ms;

/// A stored artifact.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Artifact {
    /// Unique identifier — UUID v7 for anonymous writes, caller-chosen for
    /// named writes.
    pub artifact_id: String,
    /// MIME-style media type (e.g. `text/markdown`).
    pub media_type: String,
    /// The artifact body.
    pub body: String,
    /// Free-form metadata.
    pub metadata: Value,
    /// Unix milliseconds when the artifact was first written.
    pub created_at: i64,
}

/// Contract for an external ranked content index.
///
/// Implementations (embedding, BM25, hybrid) live outside this crate; the
/// store only consumes the ranked id list.
pub trait ArtifactIndex: Send + Sync {
    /// Return up to `limit` artifact ids ranked by relevance to `query`.
    fn search(&self, query: &str, limit: usize) -> Vec<String>;
}

/// Artifact CRUD plus keyword search.
#[derive(Clone)]
pub struct ArtifactStore {
    db: Database,
}

impl ArtifactStore {
    /// Create a new artifact store backed by `db`.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Write a new artifact under a fresh id.
    #[instrument(skip(self, body, metadata))]
    pub async fn write(
        &self,
        media_type: &str,
        body: &str,
        metadata: Value,
    ) -> StoreResult<Artifact> {
        let artifact_id = Uuid::now_v7().to_string();
        self.write_named(&artifact_id, media_type, body, metadata)
            .await
    }

    /// Write an artifact under a caller-chosen id, replacing any previous
    /// body and metadata. The original `created_at` is kept on replace.
    #[instrument(skip(self, body, metadata))]
    pub async fn write_named(
        &self,
        artifact_id: &str,
        media_type: &str,
        body: &str,
        metadata: Value,
    ) -> StoreResult<Artifact> {
        let artifact_id = artifact_id.to_string();
        let media_type = media_type.to_string();
        let body = body.to_string();
        let metadata_json = serde_json::to_string(&metadata)?;
        let now = now_ms();

        let artifact = self
            .db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO artifacts (artifact_id, media_type, body, metadata, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5) \
                     ON CONFLICT(artifact_id) DO UPDATE SET \
                         media_type = excluded.media_type, \
                         body = excluded.body, \
                         metadata = excluded.metadata",
                    rusqlite::params![artifact_id, media_type, body, metadata_json, now],
                )?;
                let row = conn.query_row(
                    "SELECT artifact_id, media_type, body, metadata, created_at \
                     FROM artifacts WHERE artifact_id = ?1",
                    rusqlite::params![artifact_id],
                    artifact_row,
                )?;
                row.into_artifact()
            })
            .await?;

        debug!(artifact_id = %artifact.artifact_id, media_type = %artifact.media_type, "artifact written");
        Ok(artifact)
    }

    /// Read an artifact by id, returning `None` if not found.
    #[instrument(skip(self))]
    pub async fn read(&self, artifact_id: &str) -> StoreResult<Option<Artifact>> {
        let artifact_id = artifact_id.to_string();
        self.db
            .execute(move |conn| query_artifact_by_id(conn, &artifact_id))
            .await
    }

    /// Keyword search over artifact bodies and media types, newest first.
    #[instrument(skip(self))]
    pub async fn search(&self, query: &str, limit: i64) -> StoreResult<Vec<Artifact>> {
        let pattern = format!("%{}%", query.replace('%', "\\%").replace('_', "\\_"));
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT artifact_id, media_type, body, metadata, created_at FROM artifacts \
                     WHERE body LIKE ?1 ESCAPE '\\' OR media_type LIKE ?1 ESCAPE '\\' \
                     ORDER BY created_at DESC, rowid DESC LIMIT ?2",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![pattern, limit], artifact_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows.into_iter().map(ArtifactRow::into_artifact).collect()
            })
            .await
    }

    /// Ranked search through an external [`ArtifactIndex`]: resolve the
    /// index's ranked ids to stored artifacts, preserving rank order and
    /// dropping ids the store no longer holds.
    pub async fn search_ranked(
        &self,
        index: &dyn ArtifactIndex,
        query: &str,
        limit: usize,
    ) -> StoreResult<Vec<Artifact>> {
        let mut artifacts = Vec::new();
        for artifact_id in index.search(query, limit) {
            if let Some(artifact) = self.read(&artifact_id).await? {
                artifacts.push(artifact);
            }
        }
        Ok(artifacts)
    }
}

// ── row mapping ──────────────────────────────────────────────────────

struct ArtifactRow {
    artifact_id: String,
    media_type: String,
    body: String,
    metadata: String,
    created_at: i64,
}

impl ArtifactRow {
    fn into_artifact(self) -> StoreResult<Artifact> {
        Ok(Artifact {
            artifact_id: self.artifact_id,
            media_type: self.media_type,
            body: self.body,
            metadata: serde_json::from_str(&self.metadata)?,
            created_at: self.created_at,
        })
    }
}

fn artifact_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ArtifactRow> {
    Ok(ArtifactRow {
        artifact_id: row.get(0)?,
        media_type: row.get(1)?,
        body: row.get(2)?,
        metadata: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn query_artifact_by_id(
    conn: &rusqlite::Connection,
    artifact_id: &str,
) -> StoreResult<Option<Artifact>> {
    let row = conn
        .query_row(
            "SELECT artifact_id, media_type, body, metadata, created_at \
             FROM artifacts WHERE artifact_id = ?1",
            rusqlite::params![artifact_id],
            artifact_row,
        )
        .optional()?;
    row.map(ArtifactRow::into_artifact).transpose()
}

// ── tests ────────────────────────────────────────────────────────────
