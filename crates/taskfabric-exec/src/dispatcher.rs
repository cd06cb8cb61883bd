//! Work dispatcher.
//!
//! Bridges queued `work` tasks into the worker pool and reaps their
//! outcomes. Each tick runs four phases in order:
//!
//! 1. **Scan and claim** — admit due `work` tasks (respecting `run_at`)
//!    into the pending queue under a claim lease.
//! 2. **Dispatch** — move pending entries into the in-flight set and emit
//!    them on the work channel, never exceeding `worker_count` in flight.
//! 3. **Reap results** — drain the result channel, finalize tasks, emit
//!    completion notifications, reschedule recurring tasks in place.
//! 4. **Reap timeouts** — fail tasks stuck in pending or in flight past
//!    their limits.
//!
//! The pending queue and in-flight map are owned by the single background
//! loop; the store is the only shared state, and every transition goes
//! through its atomic operations.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use taskfabric_runner::{ErrorInfo, RunState};
use taskfabric_store::{StateStore, Task, TaskFilter, TaskPatch, TaskState, kind};

use crate::channel::{ResultEnvelope, ResultReceiver, WorkMessage, WorkSender};
use crate::codes;
use crate::error::Result;
use crate::time::parse_iso8601_utc;

/// Floor for recurrence intervals, in seconds.
pub const MIN_REPEAT_INTERVAL_SECONDS: i64 = 3600;

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// In-flight parallelism bound.
    pub worker_count: usize,
    /// Lease length for dispatcher-initiated claims.
    pub claim_ttl_seconds: i64,
    /// Wall-clock limit for in-flight execution.
    pub worker_timeout: Duration,
    /// How long a task may wait in pending before it is failed.
    pub work_queue_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            worker_count: 2,
            claim_ttl_seconds: 30,
            worker_timeout: Duration::from_secs(600),
            work_queue_timeout: Duration::from_secs(1800),
        }
    }
}

/// A claimed task waiting for a worker slot.
#[derive(Debug, Clone)]
struct PendingWork {
    task_id: String,
    enqueued_at: Instant,
    timeout: Duration,
}

/// Selects ready work, feeds the worker pool, and finalizes outcomes.
pub struct Dispatcher {
    state: StateStore,
    config: DispatchConfig,
    work_tx: Arc<dyn WorkSender>,
    result_rx: Arc<dyn ResultReceiver>,
    pending: VecDeque<PendingWork>,
    inflight: HashMap<String, Instant>,
}

impl Dispatcher {
    /// Create a dispatcher over the given store and channel endpoints.
    pub fn new(
        state: StateStore,
        config: DispatchConfig,
        work_tx: Arc<dyn WorkSender>,
        result_rx: Arc<dyn ResultReceiver>,
    ) -> Self {
        Self {
            state,
            config,
            work_tx,
            result_rx,
            pending: VecDeque::new(),
            inflight: HashMap::new(),
        }
    }

    /// Run one tick: scan, dispatch, reap results, reap timeouts.
    pub async fn run_once(&mut self) -> Result<()> {
        self.scan_and_claim().await?;
        self.dispatch_pending().await?;
        self.reap_results().await?;
        self.reap_timed_out_pending().await?;
        self.reap_timed_out_inflight().await?;
        Ok(())
    }

    /// Number of admitted-but-not-dispatched tasks.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of tasks currently at workers.
    pub fn inflight_len(&self) -> usize {
        self.inflight.len()
    }

    // ── phase 1: scan and claim ──────────────────────────────────────

    /// Admit due `work` tasks into the pending queue.
    ///
    /// Candidates are ordered by effective `run_at` (absent means "now"),
    /// then creation time, so earlier-scheduled work is never admitted
    /// after later-scheduled work observed in the same scan.
    async fn scan_and_claim(&mut self) -> Result<()> {
        let tasks = self
            .state
            .tasks()
            .list(Some(kind::WORK), Some(TaskState::Queued))
            .await?;
        let now = Utc::now();

        let mut due: Vec<(DateTime<Utc>, Task)> = Vec::new();
        for task in tasks {
            if self.is_tracked(&task.task_id) {
                continue;
            }
            match effective_run_at(&task.payload) {
                RunAt::Due(at) => {
                    if at > now {
                        continue;
                    }
                    due.push((at, task));
                }
                RunAt::Invalid(raw) => {
                    warn!(task_id = %task.task_id, run_at = %raw, "unparseable run_at");
                    self.state
                        .tasks()
                        .fail(
                            &task.task_id,
                            ErrorInfo::new(codes::INVALID_RUN_AT, "run_at is not ISO-8601")
                                .to_value(),
                        )
                        .await?;
                }
            }
        }
        due.sort_by(|(a, ta), (b, tb)| a.cmp(b).then(ta.created_at.cmp(&tb.created_at)));

        for (_, task) in due {
            let claimed = self
                .state
                .tasks()
                .claim(
                    &TaskFilter::by_id(&task.task_id),
                    "main",
                    self.config.claim_ttl_seconds,
                )
                .await?;
            if claimed.is_none() {
                continue;
            }
            debug!(task_id = %task.task_id, "work task admitted");
            self.pending.push_back(PendingWork {
                task_id: task.task_id,
                enqueued_at: Instant::now(),
                timeout: self.config.work_queue_timeout,
            });
        }
        Ok(())
    }

    // ── phase 2: dispatch ────────────────────────────────────────────

    /// Move pending entries to in-flight, FIFO, up to the worker budget.
    async fn dispatch_pending(&mut self) -> Result<()> {
        let available = self.config.worker_count.saturating_sub(self.inflight.len());
        for _ in 0..available {
            let Some(entry) = self.pending.pop_front() else {
                break;
            };
            self.work_tx
                .send(WorkMessage {
                    task_id: entry.task_id.clone(),
                })
                .await?;
            debug!(task_id = %entry.task_id, "work task dispatched");
            self.inflight.insert(entry.task_id, Instant::now());
        }
        Ok(())
    }

    // ── phase 3: reap results ────────────────────────────────────────

    /// Drain the result channel and finalize each reported task.
    async fn reap_results(&mut self) -> Result<()> {
        loop {
            let envelope = match self.result_rx.try_recv().await {
                Ok(Some(envelope)) => envelope,
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "worker result receive failed");
                    break;
                }
            };
            self.inflight.remove(&envelope.task_id);

            let Some(task) = self.state.tasks().get(&envelope.task_id).await? else {
                warn!(task_id = %envelope.task_id, "result for unknown task dropped");
                continue;
            };
            if task.state.is_terminal() {
                // The task timed out earlier; its late result is discarded.
                info!(task_id = %task.task_id, state = %task.state, "late result for terminal task discarded");
                continue;
            }

            self.finalize(&task, envelope).await?;
        }
        Ok(())
    }

    /// Apply one result envelope to its task.
    async fn finalize(&mut self, task: &Task, envelope: ResultEnvelope) -> Result<()> {
        match envelope.state {
            RunState::Done => {
                let recurring = task
                    .work_payload()
                    .map(|p| p.is_recurring())
                    .unwrap_or(false);
                if recurring {
                    self.reschedule(task).await?;
                } else {
                    self.state.tasks().complete(&task.task_id).await?;
                }

                if let Some(output) = envelope.user_output.as_deref()
                    && !output.is_empty()
                {
                    self.state
                        .tasks()
                        .create(
                            kind::NOTIFICATION,
                            json!({
                                "message": output,
                                "severity": "info",
                                "related_task_id": task.task_id,
                                "artifact_refs": envelope.artifact_refs,
                                "meta": envelope.meta,
                            }),
                        )
                        .await?;
                    debug!(task_id = %task.task_id, "completion notification created");
                }
            }
            RunState::Failed => {
                let error = envelope
                    .error
                    .map(|e| e.to_value())
                    .unwrap_or_else(|| json!({"message": "failed"}));
                self.state.tasks().fail(&task.task_id, error).await?;
            }
        }
        Ok(())
    }

    /// Reset a recurring task's own row to `queued` with a fresh `run_at`.
    ///
    /// Consumers holding the task id will see it "resurrected" — the row
    /// is reused, no descendant task is created.
    async fn reschedule(&self, task: &Task) -> Result<()> {
        let interval = task
            .work_payload()
            .and_then(|p| p.repeat_interval_seconds)
            .unwrap_or(0)
            .max(MIN_REPEAT_INTERVAL_SECONDS);
        let next_run_at = (Utc::now() + chrono::Duration::seconds(interval)).to_rfc3339();

        info!(task_id = %task.task_id, next_run_at = %next_run_at, "recurring task rescheduled");
        let patch = TaskPatch {
            state: Some(TaskState::Queued),
            payload: Some(json!({
                "run_at": next_run_at,
                "repeat_interval_seconds": interval,
                "repeat_enabled": true,
            })),
            ..TaskPatch::clear_lease()
        };
        self.state.tasks().update(&task.task_id, patch).await?;
        Ok(())
    }

    // ── phase 4: reap timeouts ───────────────────────────────────────

    /// Fail tasks that waited in pending past their limit.
    async fn reap_timed_out_pending(&mut self) -> Result<()> {
        if self.config.work_queue_timeout.is_zero() {
            return Ok(());
        }
        let now = Instant::now();
        let mut expired = Vec::new();
        self.pending.retain(|entry| {
            if now.saturating_duration_since(entry.enqueued_at) > entry.timeout {
                expired.push(entry.task_id.clone());
                false
            } else {
                true
            }
        });

        for task_id in expired {
            error!(task_id = %task_id, "work queue timeout exceeded");
            self.state
                .tasks()
                .fail(
                    &task_id,
                    ErrorInfo::new(codes::WORK_QUEUE_TIMEOUT, "Work queue timeout exceeded.")
                        .to_value(),
                )
                .await?;
        }
        Ok(())
    }

    /// Fail tasks that ran past the worker timeout.
    ///
    /// The worker is not recalled — if it eventually publishes a result,
    /// the reap loop finds the task already terminal and discards it.
    async fn reap_timed_out_inflight(&mut self) -> Result<()> {
        if self.config.worker_timeout.is_zero() {
            return Ok(());
        }
        let now = Instant::now();
        let timed_out: Vec<String> = self
            .inflight
            .iter()
            .filter(|(_, started_at)| {
                now.saturating_duration_since(**started_at) > self.config.worker_timeout
            })
            .map(|(task_id, _)| task_id.clone())
            .collect();

        for task_id in timed_out {
            self.inflight.remove(&task_id);
            error!(task_id = %task_id, "worker timeout exceeded");
            self.state
                .tasks()
                .fail(
                    &task_id,
                    ErrorInfo::new(codes::WORKER_TIMEOUT, "Worker timeout exceeded.").to_value(),
                )
                .await?;
        }
        Ok(())
    }

    fn is_tracked(&self, task_id: &str) -> bool {
        self.inflight.contains_key(task_id)
            || self.pending.iter().any(|entry| entry.task_id == task_id)
    }
}

// ---------------------------------------------------------------------------
// run_at parsing
// ---------------------------------------------------------------------------

enum RunAt {
    /// Ready at the given time (absent `run_at` means the epoch).
    Due(DateTime<Utc>),
    /// Present but unparseable.
    Invalid(String),
}

fn effective_run_at(payload: &Value) -> RunAt {
    let raw = match payload.get("run_at") {
        None | Some(Value::Null) => return RunAt::Due(DateTime::<Utc>::MIN_UTC),
        Some(value) => value,
    };
    let Some(text) = raw.as_str() else {
        return RunAt::Invalid(raw.to_string());
    };
    if text.is_empty() {
        return RunAt::Due(DateTime::<Utc>::MIN_UTC);
    }
    match parse_iso8601_utc(text) {
        Some(at) => RunAt::Due(at),
        None => RunAt::Invalid(text.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
