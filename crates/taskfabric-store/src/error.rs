//! Error types for the taskfabric-store crate.
//!
//! All storage operations return [`StoreError`] via [`StoreResult`].
//! Missing rows are not errors — lookups return `Option` and terminal-state
//! guards return `None`; only physical storage failures surface here.

use thiserror::Error;

/// Alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the state substrate.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying SQLite storage failed.
    #[error("store unavailable: {0}")]
    Unavailable(#[from] rusqlite::Error),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A schema migration failed.
    #[error("migration v{version} failed: {message}")]
    Migration { version: u32, message: String },

    /// An invalid argument was provided to a store operation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A blocking task was cancelled or panicked.
    #[error("background task failed: {0}")]
    TaskJoin(String),
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}
