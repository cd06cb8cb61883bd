//! The runner seam.

use async_trait::async_trait;
use taskfabric_store::Task;

use crate::context::RunnerContext;
use crate::error::Result;
use crate::types::RunResult;

/// Anything able to turn a task into a [`RunResult`].
///
/// The scheduler treats runners as opaque black boxes: one task in, one
/// result out. Expected strategy failures (missing message, exhausted
/// budget) come back as failed results; `Err` is reserved for unexpected
/// trouble, which the invoking path converts to its own terminal error
/// code (`RUNNER_EXCEPTION` on the main path, `WORKER_EXCEPTION` on the
/// worker path).
#[async_trait]
pub trait Runner: Send + Sync {
    /// Execute `task` and produce its single result.
    async fn run(&self, task: &Task, ctx: &RunnerContext) -> Result<RunResult>;
}
