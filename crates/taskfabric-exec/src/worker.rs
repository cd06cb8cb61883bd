//! Worker pool.
//!
//! Each worker unit pulls one dispatch message per tick, runs the runner,
//! and publishes the result envelope. Workers never finalize tasks
//! directly — state transitions stay serialized through the dispatcher.

use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, error};

use taskfabric_runner::{ErrorInfo, Runner, RunnerContext, RunnerId, RunResult};
use taskfabric_store::StateStore;

use crate::channel::{ResultEnvelope, ResultSender, WorkReceiver};
use crate::codes;
use crate::error::Result;

/// A single worker unit over the shared work channel.
#[derive(Clone)]
pub struct WorkWorker {
    state: StateStore,
    runner: Arc<dyn Runner>,
    context: RunnerContext,
    work_rx: Arc<dyn WorkReceiver>,
    result_tx: Arc<dyn ResultSender>,
}

impl WorkWorker {
    /// Create a worker unit. The context's `runner_id` is forced to
    /// `Worker` regardless of what the caller built.
    pub fn new(
        state: StateStore,
        runner: Arc<dyn Runner>,
        mut context: RunnerContext,
        work_rx: Arc<dyn WorkReceiver>,
        result_tx: Arc<dyn ResultSender>,
    ) -> Self {
        context.runner_id = RunnerId::Worker;
        context.stream = false;
        Self {
            state,
            runner,
            context,
            work_rx,
            result_tx,
        }
    }

    /// Pull one message if available, run it, publish the envelope.
    pub async fn run_once(&self) -> Result<()> {
        let Some(message) = self.work_rx.try_recv().await? else {
            return Ok(());
        };

        let Some(task) = self.state.tasks().get(&message.task_id).await? else {
            debug!(task_id = %message.task_id, "dispatched task missing, dropped");
            return Ok(());
        };
        let meta = task.meta().cloned();

        let result = match self.runner.run(&task, &self.context).await {
            Ok(result) => result,
            Err(e) => {
                error!(task_id = %task.task_id, error = %e, "worker task failed");
                RunResult::failed(codes::WORKER_EXCEPTION, "Worker failed.")
            }
        };

        let envelope = ResultEnvelope {
            task_id: task.task_id.clone(),
            state: result.state,
            user_output: result.user_output,
            artifact_refs: result.artifact_refs,
            error: result.error,
            meta,
        };

        if let Err(e) = self.result_tx.send(envelope).await {
            error!(task_id = %task.task_id, error = %e, "worker result send failed");
            self.state
                .tasks()
                .fail(
                    &task.task_id,
                    ErrorInfo::new(codes::WORKER_SEND_FAILED, "Failed to send result.").to_value(),
                )
                .await?;
        }
        Ok(())
    }
}

/// N identical worker units sharing one work channel.
pub struct WorkerPool {
    workers: Vec<WorkWorker>,
}

impl WorkerPool {
    /// A pool of `count` clones of the given worker unit.
    pub fn new(worker: WorkWorker, count: usize) -> Self {
        Self {
            workers: vec![worker; count.max(1)],
        }
    }

    /// Drive every unit once, concurrently. Per-unit errors are logged
    /// and do not stop the other units.
    pub async fn run_once(&self) {
        let results = join_all(self.workers.iter().map(WorkWorker::run_once)).await;
        for result in results {
            if let Err(e) = result {
                error!(error = %e, "worker tick failed");
            }
        }
    }

    /// Number of worker units. The pool always holds at least one.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Whether the pool has no units.
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{InProcReceiver, ResultReceiver, WorkMessage, WorkSender, in_proc_channel};
    use async_trait::async_trait;
    use serde_json::json;
    use taskfabric_runner::testing::FakeLlm;
    use taskfabric_runner::{NoTools, RunState, RunnerError};
    use taskfabric_store::{Task, kind};

    /// Runner returning a fixed result.
    struct StaticRunner(RunResult);

    #[async_trait]
    impl Runner for StaticRunner {
        async fn run(
            &self,
            _task: &Task,
            _ctx: &RunnerContext,
        ) -> taskfabric_runner::Result<RunResult> {
            Ok(self.0.clone())
        }
    }

    /// Runner that always errors.
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

    struct Harness {
        state: StateStore,
        worker: WorkWorker,
        work_tx: crate::channel::InProcSender<WorkMessage>,
        result_rx: InProcReceiver<ResultEnvelope>,
    }

    async fn harness(runner: Arc<dyn Runner>) -> Harness {
        let state = StateStore::in_memory().await.unwrap();
        let (work_tx, work_rx) = in_proc_channel::<WorkMessage>();
        let (result_tx, result_rx) = in_proc_channel::<ResultEnvelope>();

        let context = RunnerContext {
            runner_id: RunnerId::Main, // constructor must flip this
            conversation_id: "default".into(),
            state: state.clone(),
            tools: Arc::new(NoTools),
            llm: Arc::new(FakeLlm::default()),
            tool_llm: None,
            stream: false,
        };
        let worker = WorkWorker::new(
            state.clone(),
            runner,
            context,
            Arc::new(work_rx),
            Arc::new(result_tx),
        );
        Harness {
            state,
            worker,
            work_tx,
            result_rx,
        }
    }

    #[tokio::test]
    async fn empty_channel_is_a_noop() {
        let h = harness(Arc::new(StaticRunner(RunResult::done("out")))).await;
        h.worker.run_once().await.unwrap();
        assert!(h.result_rx.try_recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn publishes_envelope_with_task_meta() {
        let h = harness(Arc::new(StaticRunner(RunResult::done("worker output")))).await;
        let task = h
            .state
            .tasks()
            .create(kind::WORK, json!({"message": "do", "meta": {"channel_id": 7}}))
            .await
            .unwrap();

        WorkSender::send(&h.work_tx, WorkMessage { task_id: task.task_id.clone() })
            .await
            .unwrap();
        h.worker.run_once().await.unwrap();

        let envelope = h.result_rx.try_recv().await.unwrap().unwrap();
        assert_eq!(envelope.task_id, task.task_id);
        assert_eq!(envelope.state, RunState::Done);
        assert_eq!(envelope.user_output.as_deref(), Some("worker output"));
        assert_eq!(envelope.meta.unwrap()["channel_id"], 7);

        // Finalization is the dispatcher's job — the task is untouched.
        let stored = h.state.tasks().get(&task.task_id).await.unwrap().unwrap();
        assert_eq!(stored.state, taskfabric_store::TaskState::Queued);
    }

    #[tokio::test]
    async fn runner_error_becomes_worker_exception_envelope() {
        let h = harness(Arc::new(ErroringRunner)).await;
        let task = h
            .state
            .tasks()
            .create(kind::WORK, json!({"message": "do"}))
            .await
            .unwrap();

        WorkSender::send(&h.work_tx, WorkMessage { task_id: task.task_id.clone() })
            .await
            .unwrap();
        h.worker.run_once().await.unwrap();

        let envelope = h.result_rx.try_recv().await.unwrap().unwrap();
        assert_eq!(envelope.state, RunState::Failed);
        assert_eq!(envelope.error.unwrap().code, codes::WORKER_EXCEPTION);
    }

    #[tokio::test]
    async fn missing_task_is_dropped_silently() {
        let h = harness(Arc::new(StaticRunner(RunResult::done("out")))).await;
        WorkSender::send(&h.work_tx, WorkMessage { task_id: "ghost".into() })
            .await
            .unwrap();
        h.worker.run_once().await.unwrap();
        assert!(h.result_rx.try_recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn closed_result_channel_fails_the_task_inline() {
        let state = StateStore::in_memory().await.unwrap();
        let (work_tx, work_rx) = in_proc_channel::<WorkMessage>();
        let (result_tx, result_rx) = in_proc_channel::<ResultEnvelope>();
        drop(result_rx);

        let context = RunnerContext {
            runner_id: RunnerId::Worker,
            conversation_id: "default".into(),
            state: state.clone(),
            tools: Arc::new(NoTools),
            llm: Arc::new(FakeLlm::default()),
            tool_llm: None,
            stream: false,
        };
        let worker = WorkWorker::new(
            state.clone(),
            Arc::new(StaticRunner(RunResult::done("out"))),
            context,
            Arc::new(work_rx),
            Arc::new(result_tx),
        );

        let task = state
            .tasks()
            .create(kind::WORK, json!({"message": "do"}))
            .await
            .unwrap();
        WorkSender::send(&work_tx, WorkMessage { task_id: task.task_id.clone() })
            .await
            .unwrap();

        worker.run_once().await.unwrap();

        let failed = state.tasks().get(&task.task_id).await.unwrap().unwrap();
        assert_eq!(failed.state, taskfabric_store::TaskState::Failed);
        assert_eq!(failed.payload["error"]["code"], codes::WORKER_SEND_FAILED);
    }
}
