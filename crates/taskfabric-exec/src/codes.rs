//! Machine error codes recorded on failed tasks by the execution fabric.
//!
//! Runner-internal codes (`MISSING_MESSAGE`, `BUDGET_EXCEEDED`) live in
//! `taskfabric_runner::codes`; everything the fabric itself raises is
//! here.

/// The session could not claim the task it just created.
pub const CLAIM_FAILED: &str = "CLAIM_FAILED";
/// A claimed task disappeared before it could run.
pub const TASK_NOT_FOUND: &str = "TASK_NOT_FOUND";
/// A work task carried an unparseable `run_at`.
pub const INVALID_RUN_AT: &str = "INVALID_RUN_AT";
/// A task sat in the pending queue past its limit.
pub const WORK_QUEUE_TIMEOUT: &str = "WORK_QUEUE_TIMEOUT";
/// An in-flight task exceeded its wall-clock limit.
pub const WORKER_TIMEOUT: &str = "WORKER_TIMEOUT";
/// The runner errored inside a worker.
pub const WORKER_EXCEPTION: &str = "WORKER_EXCEPTION";
/// A worker could not publish its result envelope.
pub const WORKER_SEND_FAILED: &str = "WORKER_SEND_FAILED";
/// The main-path runner exceeded its deadline.
pub const MAIN_TIMEOUT: &str = "MAIN_TIMEOUT";
/// The main-path runner errored.
pub const RUNNER_EXCEPTION: &str = "RUNNER_EXCEPTION";
