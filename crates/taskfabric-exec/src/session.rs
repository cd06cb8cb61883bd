//! The synchronous main path and worker lifecycle.
//!
//! [`Session`] is the user-facing surface of the fabric: it turns one
//! message into one `user_request` task, runs it under a hard deadline,
//! journals the turn, and returns a [`MessageResult`]. Background workers
//! live on a dedicated thread owning a single-threaded tokio runtime, so
//! a slow worker can never stall the conversation.
//!
//! The main-path deadline uses native async cancellation — the runner
//! future is dropped at its next suspension point when the timeout
//! elapses.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::{error, info, warn};

use taskfabric_runner::{
    ErrorInfo, LlmApi, RunResult, RunState, Runner, RunnerContext, RunnerId, ToolApi,
};
use taskfabric_store::{StateStore, Task, TaskFilter, WorkPayload, kind};

use crate::channel::{ResultEnvelope, WorkMessage, in_proc_channel};
use crate::codes;
use crate::config::ExecConfig;
use crate::dispatcher::{Dispatcher, MIN_REPEAT_INTERVAL_SECONDS};
use crate::error::{ExecError, Result};
use crate::exec_loop::{ExecutionLoop, StopHandle};
use crate::time::parse_iso8601_utc;
use crate::worker::{WorkWorker, WorkerPool};

/// How long `stop_workers` waits for the background thread to exit.
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// The outcome of one main-path message.
#[derive(Debug, Clone)]
pub struct MessageResult {
    /// The assistant's reply, when the run produced one.
    pub message: Option<String>,
    /// Terminal state of the backing task.
    pub state: RunState,
    /// Artifacts attached to the reply.
    pub artifact_refs: Vec<String>,
    /// Failure details when `state` is `failed`.
    pub error: Option<ErrorInfo>,
    /// Raw stream chunks when streaming was requested.
    pub stream_chunks: Vec<String>,
}

impl MessageResult {
    fn failed(code: &str, message: &str) -> Self {
        Self {
            message: None,
            state: RunState::Failed,
            artifact_refs: Vec::new(),
            error: Some(ErrorInfo::new(code, message)),
            stream_chunks: Vec::new(),
        }
    }
}

/// Handle to the running background loop.
struct WorkerHandle {
    stop: StopHandle,
    thread: std::thread::JoinHandle<()>,
}

/// The main-path API: messages in, results out, workers on the side.
pub struct Session {
    state: StateStore,
    runner: Arc<dyn Runner>,
    tools: Arc<dyn ToolApi>,
    llm: Arc<dyn LlmApi>,
    tool_llm: Option<Arc<dyn LlmApi>>,
    config: ExecConfig,
    workers: Option<WorkerHandle>,
}

impl Session {
    /// Build a session over the shared store and the bound seams.
    pub fn new(
        state: StateStore,
        runner: Arc<dyn Runner>,
        tools: Arc<dyn ToolApi>,
        llm: Arc<dyn LlmApi>,
        config: ExecConfig,
    ) -> Self {
        Self {
            state,
            runner,
            tools,
            llm,
            tool_llm: None,
            config,
            workers: None,
        }
    }

    /// Use a separate model for tool discovery.
    pub fn with_tool_llm(mut self, tool_llm: Arc<dyn LlmApi>) -> Self {
        self.tool_llm = Some(tool_llm);
        self
    }

    /// The shared state handle this session operates on.
    pub fn state(&self) -> &StateStore {
        &self.state
    }

    // ── main path ────────────────────────────────────────────────────

    /// Process one user message synchronously and return the result.
    ///
    /// Creates the `user_request` task, journals the user turn, claims
    /// the task, runs the runner under the main deadline, finalizes the
    /// task, and sets the assistant turn.
    pub async fn send_message(&self, message: &str, stream: bool) -> Result<MessageResult> {
        let task = self
            .state
            .tasks()
            .create(kind::USER_REQUEST, json!({ "user_message": message }))
            .await?;
        let turn = self
            .state
            .turns()
            .append_user(&self.config.session.conversation_id, message, Some(&task.task_id))
            .await?;

        let claimed = self
            .state
            .tasks()
            .claim(
                &TaskFilter::by_id(&task.task_id),
                RunnerId::Main.as_str(),
                self.config.session.claim_ttl_seconds,
            )
            .await?;
        let Some(claimed) = claimed else {
            error!(task_id = %task.task_id, "failed to claim task");
            self.state
                .tasks()
                .fail(
                    &task.task_id,
                    ErrorInfo::new(codes::CLAIM_FAILED, "Failed to claim task.").to_value(),
                )
                .await?;
            return Ok(MessageResult::failed(codes::CLAIM_FAILED, "Failed to claim task."));
        };

        let Some(task) = self.state.tasks().get(&claimed.task_id).await? else {
            error!(task_id = %claimed.task_id, "failed to load claimed task");
            self.state
                .tasks()
                .fail(
                    &claimed.task_id,
                    ErrorInfo::new(codes::TASK_NOT_FOUND, "Failed to load task.").to_value(),
                )
                .await?;
            return Ok(MessageResult::failed(codes::TASK_NOT_FOUND, "Failed to load task."));
        };

        let result = self.run_with_deadline(&task, stream).await;

        let mut assistant_message = result.user_output.clone().unwrap_or_default();
        if !result.stream_chunks.is_empty() {
            let joined = result.stream_chunks.concat();
            if !joined.is_empty() {
                assistant_message = joined;
            }
        }

        self.finalize(&task, &result).await?;
        self.state
            .turns()
            .set_assistant(
                &turn.turn_id,
                &assistant_message,
                result.artifact_refs.clone(),
                json!({ "task_state": result.state }),
            )
            .await?;

        Ok(MessageResult {
            message: Some(assistant_message),
            state: result.state,
            artifact_refs: result.artifact_refs,
            error: result.error,
            stream_chunks: result.stream_chunks,
        })
    }

    /// Claim and consume queued notification tasks, returning their
    /// messages in claim order.
    pub async fn drain_notifications(&self) -> Result<Vec<String>> {
        let mut messages = Vec::new();
        loop {
            let claimed = self
                .state
                .tasks()
                .claim(
                    &TaskFilter::by_type(kind::NOTIFICATION),
                    RunnerId::Main.as_str(),
                    self.config.session.claim_ttl_seconds,
                )
                .await?;
            let Some(notification) = claimed else {
                break;
            };
            if let Some(Value::String(message)) = notification.payload.get("message")
                && !message.is_empty()
            {
                messages.push(message.clone());
            }
            self.state.tasks().complete(&notification.task_id).await?;
        }
        Ok(messages)
    }

    /// Create a `work` task, validating `run_at` and clamping the
    /// recurrence interval. Returns the new task id.
    pub async fn create_work_task(
        &self,
        payload: WorkPayload,
        run_at: Option<&str>,
        repeat_every_seconds: Option<i64>,
        repeat_enabled: bool,
    ) -> Result<String> {
        let mut payload = payload;
        if let Some(run_at) = run_at {
            validate_run_at(run_at)?;
            payload.run_at = Some(run_at.to_string());
        }
        if let Some(seconds) = repeat_every_seconds {
            payload.repeat_interval_seconds = Some(seconds.max(MIN_REPEAT_INTERVAL_SECONDS));
            payload.repeat_enabled = repeat_enabled;
        } else if repeat_enabled {
            payload.repeat_enabled = true;
        }

        let task = self
            .state
            .tasks()
            .create(kind::WORK, serde_json::to_value(&payload)?)
            .await?;
        info!(task_id = %task.task_id, "work task created");
        Ok(task.task_id)
    }

    // ── worker lifecycle ─────────────────────────────────────────────

    /// Start the background execution loop on its own thread.
    ///
    /// Idempotent: calling while the loop is alive is a no-op.
    pub fn start_workers(&mut self) -> Result<()> {
        if let Some(handle) = &self.workers
            && !handle.thread.is_finished()
        {
            info!("workers already running");
            return Ok(());
        }
        self.workers = None;

        let (work_tx, work_rx) = in_proc_channel::<WorkMessage>();
        let (result_tx, result_rx) = in_proc_channel::<ResultEnvelope>();

        let dispatcher = Dispatcher::new(
            self.state.clone(),
            self.config.dispatch.clone(),
            Arc::new(work_tx),
            Arc::new(result_rx),
        );
        let context = RunnerContext {
            runner_id: RunnerId::Worker,
            conversation_id: self.config.session.conversation_id.clone(),
            state: self.state.clone(),
            tools: Arc::clone(&self.tools),
            llm: Arc::clone(&self.llm),
            tool_llm: self.tool_llm.clone(),
            stream: false,
        };
        let worker = WorkWorker::new(
            self.state.clone(),
            Arc::clone(&self.runner),
            context,
            Arc::new(work_rx),
            Arc::new(result_tx),
        );
        let pool = WorkerPool::new(worker, self.config.dispatch.worker_count);
        let exec_loop = ExecutionLoop::new(dispatcher, pool, self.config.exec_loop.clone());
        let stop = exec_loop.stop_handle();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ExecError::Runtime(e.to_string()))?;
        let thread = std::thread::Builder::new()
            .name("taskfabric-exec".to_string())
            .spawn(move || runtime.block_on(exec_loop.run()))
            .map_err(|e| ExecError::Runtime(e.to_string()))?;

        info!("background workers started");
        self.workers = Some(WorkerHandle { stop, thread });
        Ok(())
    }

    /// Stop the background loop cooperatively, waiting up to five
    /// seconds for the thread to exit.
    pub fn stop_workers(&mut self) {
        let Some(handle) = self.workers.take() else {
            return;
        };
        handle.stop.stop();

        let deadline = std::time::Instant::now() + STOP_JOIN_TIMEOUT;
        while !handle.thread.is_finished() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        if handle.thread.is_finished() {
            if handle.thread.join().is_err() {
                error!("execution loop thread panicked");
            }
            info!("background workers stopped");
        } else {
            warn!("execution loop did not stop within 5s; detaching");
        }
    }

    // ── internals ────────────────────────────────────────────────────

    /// Run the main-path runner under the configured deadline.
    async fn run_with_deadline(&self, task: &Task, stream: bool) -> RunResult {
        let context = RunnerContext {
            runner_id: RunnerId::Main,
            conversation_id: self.config.session.conversation_id.clone(),
            state: self.state.clone(),
            tools: Arc::clone(&self.tools),
            llm: Arc::clone(&self.llm),
            tool_llm: self.tool_llm.clone(),
            stream,
        };

        let timeout = self.config.session.main_runner_timeout;
        let outcome = if timeout.is_zero() {
            Ok(self.runner.run(task, &context).await)
        } else {
            tokio::time::timeout(timeout, self.runner.run(task, &context)).await
        };

        match outcome {
            Err(_elapsed) => {
                error!(task_id = %task.task_id, "main runner timeout");
                RunResult::failed(codes::MAIN_TIMEOUT, "Runner timeout.")
            }
            Ok(Err(e)) => {
                error!(task_id = %task.task_id, error = %e, "main task failed");
                RunResult::failed(codes::RUNNER_EXCEPTION, "Runner failed.")
            }
            Ok(Ok(result)) => result,
        }
    }

    /// Apply the run result to the backing task.
    async fn finalize(&self, task: &Task, result: &RunResult) -> Result<()> {
        match result.state {
            RunState::Done => {
                self.state.tasks().complete(&task.task_id).await?;
            }
            RunState::Failed => {
                let error = result
                    .error
                    .as_ref()
                    .map(ErrorInfo::to_value)
                    .unwrap_or_else(|| json!({"message": "failed"}));
                self.state.tasks().fail(&task.task_id, error).await?;
            }
        }
        Ok(())
    }
}

/// Validate a caller-supplied `run_at`: ISO-8601, in the future, within
/// one year.
fn validate_run_at(run_at: &str) -> Result<()> {
    let Some(parsed) = parse_iso8601_utc(run_at) else {
        return Err(ExecError::InvalidRunAt("run_at must be ISO-8601".into()));
    };
    let now = Utc::now();
    if parsed < now {
        return Err(ExecError::InvalidRunAt("run_at must be in the future".into()));
    }
    if parsed > now + chrono::Duration::days(365) {
        return Err(ExecError::InvalidRunAt("run_at must be within 1 year".into()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use taskfabric_runner::testing::FakeLlm;
    use taskfabric_runner::{NoTools, RunnerError};
    use taskfabric_store::TaskState;

    struct StaticRunner(String);

    #[async_trait]
    impl Runner for StaticRunner {
        async fn run(
            &self,
            _task: &Task,
            _ctx: &RunnerContext,
        ) -> taskfabric_runner::Result<RunResult> {
            Ok(RunResult::done(self.0.clone()))
        }
    }

    struct HangingRunner;

    #[async_trait]
    impl Runner for HangingRunner {
        async fn run(
            &self,
            _task: &Task,
            _ctx: &RunnerContext,
        ) -> taskfabric_runner::Result<RunResult> {
            std::future::pending().await
        }
    }

    struct ErroringRunner;

    #[async_trait]
    impl Runner for ErroringRunner {
        async fn run(
            &self,
            _task: &Task,
            _ctx: &RunnerContext,
        ) -> taskfabric_runner::Result<RunResult> {
            Err(RunnerError::Internal("kaboom".into()))
        }
    }

    async fn session_with(runner: Arc<dyn Runner>, config: ExecConfig) -> Session {
        let state = StateStore::in_memory().await.unwrap();
        Session::new(
            state,
            runner,
            Arc::new(NoTools),
            Arc::new(FakeLlm::default()),
            config,
        )
    }

    #[tokio::test]
    async fn send_message_happy_path_journals_both_turns() {
        let session = session_with(
            Arc::new(StaticRunner("main done".into())),
            ExecConfig::default(),
        )
        .await;

        let result = session.send_message("hello", false).await.unwrap();

        assert_eq!(result.state, RunState::Done);
        assert_eq!(result.message.as_deref(), Some("main done"));
        assert!(result.error.is_none());

        // The backing task is done.
        let tasks = session
            .state()
            .tasks()
            .list(Some(kind::USER_REQUEST), None)
            .await
            .unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].state, TaskState::Done);

        // One turn, user half then assistant half.
        let turns = session.state().turns().list_recent("default", 10).await.unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].user_message, "hello");
        assert_eq!(turns[0].assistant_message.as_deref(), Some("main done"));
        assert_eq!(turns[0].metadata["task_state"], "done");
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_fails_with_main_timeout() {
        let config = ExecConfig {
            session: crate::config::SessionConfig {
                main_runner_timeout: Duration::from_millis(50),
                ..crate::config::SessionConfig::default()
            },
            ..ExecConfig::default()
        };
        let session = session_with(Arc::new(HangingRunner), config).await;

        let result = session.send_message("hello", false).await.unwrap();

        assert_eq!(result.state, RunState::Failed);
        assert_eq!(result.error.as_ref().unwrap().code, codes::MAIN_TIMEOUT);

        let tasks = session
            .state()
            .tasks()
            .list(Some(kind::USER_REQUEST), None)
            .await
            .unwrap();
        assert_eq!(tasks[0].state, TaskState::Failed);
        assert_eq!(tasks[0].payload["error"]["code"], codes::MAIN_TIMEOUT);
    }

    #[tokio::test]
    async fn runner_error_fails_with_runner_exception() {
        let session = session_with(Arc::new(ErroringRunner), ExecConfig::default()).await;

        let result = session.send_message("hello", false).await.unwrap();

        assert_eq!(result.state, RunState::Failed);
        assert_eq!(result.error.as_ref().unwrap().code, codes::RUNNER_EXCEPTION);

        let tasks = session
            .state()
            .tasks()
            .list(Some(kind::USER_REQUEST), None)
            .await
            .unwrap();
        assert_eq!(tasks[0].state, TaskState::Failed);
    }

    #[tokio::test]
    async fn drain_returns_messages_in_claim_order_and_completes() {
        let session = session_with(
            Arc::new(StaticRunner("x".into())),
            ExecConfig::default(),
        )
        .await;

        for text in ["first", "second"] {
            session
                .state()
                .tasks()
                .create(kind::NOTIFICATION, json!({"message": text, "severity": "info"}))
                .await
                .unwrap();
        }

        let messages = session.drain_notifications().await.unwrap();
        assert_eq!(messages, vec!["first".to_string(), "second".to_string()]);

        // All consumed; a second drain is empty.
        assert!(session.drain_notifications().await.unwrap().is_empty());
        let remaining = session
            .state()
            .tasks()
            .list(Some(kind::NOTIFICATION), Some(TaskState::Queued))
            .await
            .unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn create_work_task_validates_run_at() {
        let session = session_with(
            Arc::new(StaticRunner("x".into())),
            ExecConfig::default(),
        )
        .await;
        let payload = WorkPayload {
            message: "job".into(),
            ..WorkPayload::default()
        };

        let past = (Utc::now() - chrono::Duration::hours(1)).to_rfc3339();
        assert!(matches!(
            session.create_work_task(payload.clone(), Some(&past), None, false).await,
            Err(ExecError::InvalidRunAt(_))
        ));

        let too_far = (Utc::now() + chrono::Duration::days(400)).to_rfc3339();
        assert!(matches!(
            session.create_work_task(payload.clone(), Some(&too_far), None, false).await,
            Err(ExecError::InvalidRunAt(_))
        ));

        assert!(matches!(
            session.create_work_task(payload.clone(), Some("soonish"), None, false).await,
            Err(ExecError::InvalidRunAt(_))
        ));

        let valid = (Utc::now() + chrono::Duration::hours(1)).to_rfc3339();
        let task_id = session
            .create_work_task(payload, Some(&valid), None, false)
            .await
            .unwrap();
        let task = session.state().tasks().get(&task_id).await.unwrap().unwrap();
        assert_eq!(task.payload["run_at"], valid);
    }

    #[tokio::test]
    async fn create_work_task_clamps_repeat_interval() {
        let session = session_with(
            Arc::new(StaticRunner("x".into())),
            ExecConfig::default(),
        )
        .await;
        let payload = WorkPayload {
            message: "tick".into(),
            ..WorkPayload::default()
        };

        let task_id = session
            .create_work_task(payload, None, Some(10), true)
            .await
            .unwrap();
        let task = session.state().tasks().get(&task_id).await.unwrap().unwrap();

        assert_eq!(
            task.payload["repeat_interval_seconds"],
            MIN_REPEAT_INTERVAL_SECONDS
        );
        assert_eq!(task.payload["repeat_enabled"], true);
    }
}
