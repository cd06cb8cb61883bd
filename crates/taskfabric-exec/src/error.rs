//! Error types for the taskfabric-exec crate.

use taskfabric_runner::RunnerError;
use taskfabric_store::StoreError;
use thiserror::Error;

/// Alias for `Result<T, ExecError>`.
pub type Result<T> = std::result::Result<T, ExecError>;

/// Errors surfaced by the execution fabric.
///
/// Failures scoped to a single task never appear here — they become
/// terminal task states in the store or failed message results. This
/// type covers fabric-level trouble: closed channels, storage failures,
/// invalid caller input.
#[derive(Debug, Error)]
pub enum ExecError {
    /// A work or result channel is closed.
    #[error("channel closed: {0}")]
    ChannelClosed(String),

    /// A `run_at` argument failed validation.
    #[error("invalid run_at: {0}")]
    InvalidRunAt(String),

    /// An error propagated from the state substrate.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// An error propagated from a runner seam.
    #[error("runner error: {0}")]
    Runner(#[from] RunnerError),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The background worker runtime could not be started.
    #[error("worker runtime error: {0}")]
    Runtime(String),
}
