//! Runner error types.
//!
//! Strategy-level failures a runner expects (missing message, exhausted
//! budget) are encoded as failed [`crate::RunResult`]s, not errors. This
//! type covers the unexpected: LLM transport failures, unknown tools,
//! storage trouble. The execution layer converts it to a terminal task
//! state (`WORKER_EXCEPTION` on the worker path, `RUNNER_EXCEPTION` on
//! the main path) — it never escapes a component boundary uncaught.

use taskfabric_store::StoreError;
use thiserror::Error;

/// Alias for `Result<T, RunnerError>`.
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Unified error type for runner strategies and their API seams.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// A request to the language model failed.
    #[error("llm request failed: {reason}")]
    Llm { reason: String },

    /// A tool call referenced by the LLM does not exist.
    #[error("unknown tool: {tool_name}")]
    UnknownTool { tool_name: String },

    /// A tool invocation failed.
    #[error("tool execution failed for `{tool_name}`: {reason}")]
    ToolExecutionFailed { tool_name: String, reason: String },

    /// An error propagated from the state substrate.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Catch-all for unexpected internal errors.
    #[error("internal runner error: {0}")]
    Internal(String),
}
