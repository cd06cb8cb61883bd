//! Execution loop.
//!
//! The periodic driver of the background path: one dispatcher tick, one
//! worker-pool tick, sleep, repeat. Non-fatal errors are logged and the
//! loop continues; the stop flag is honored cooperatively at the top of
//! each iteration.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{error, info};

use crate::dispatcher::Dispatcher;
use crate::worker::WorkerPool;

/// Loop configuration.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Sleep between ticks.
    pub poll_interval: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Cooperative stop signal for a running [`ExecutionLoop`].
#[derive(Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    /// Ask the loop to exit after the current tick.
    pub fn stop(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Whether a stop has been requested.
    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Drives the dispatcher and worker pool until stopped.
pub struct ExecutionLoop {
    dispatcher: Dispatcher,
    pool: WorkerPool,
    config: LoopConfig,
    stop: Arc<AtomicBool>,
}

impl ExecutionLoop {
    /// Build a loop over the given dispatcher and pool.
    pub fn new(dispatcher: Dispatcher, pool: WorkerPool, config: LoopConfig) -> Self {
        Self {
            dispatcher,
            pool,
            config,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A handle that can stop this loop from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            flag: Arc::clone(&self.stop),
        }
    }

    /// Tick until the stop flag is raised.
    pub async fn run(mut self) {
        info!(poll_interval = ?self.config.poll_interval, "execution loop started");
        while !self.stop.load(Ordering::Acquire) {
            if let Err(e) = self.dispatcher.run_once().await {
                error!(error = %e, "dispatcher tick failed");
            }
            self.pool.run_once().await;
            tokio::time::sleep(self.config.poll_interval).await;
        }
        info!("execution loop stopped");
    }

    /// Run exactly one tick — used by tests that need deterministic
    /// interleaving without the background sleep.
    pub async fn tick(&mut self) {
        if let Err(e) = self.dispatcher.run_once().await {
            error!(error = %e, "dispatcher tick failed");
        }
        self.pool.run_once().await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::in_proc_channel;
    use crate::dispatcher::DispatchConfig;
    use crate::worker::WorkWorker;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;
    use taskfabric_runner::testing::FakeLlm;
    use taskfabric_runner::{
        NoTools, RunResult, Runner, RunnerContext, RunnerId,
    };
    use taskfabric_store::{StateStore, Task, TaskState, kind};

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

    fn build_loop(state: &StateStore, runner: Arc<dyn Runner>) -> ExecutionLoop {
        let (work_tx, work_rx) = in_proc_channel::<crate::channel::WorkMessage>();
        let (result_tx, result_rx) = in_proc_channel::<crate::channel::ResultEnvelope>();

        let dispatcher = Dispatcher::new(
            state.clone(),
            DispatchConfig::default(),
            Arc::new(work_tx),
            Arc::new(result_rx),
        );
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
            runner,
            context,
            Arc::new(work_rx),
            Arc::new(result_tx),
        );
        ExecutionLoop::new(dispatcher, WorkerPool::new(worker, 2), LoopConfig::default())
    }

    #[tokio::test]
    async fn ticks_carry_a_task_to_done() {
        let state = StateStore::in_memory().await.unwrap();
        let task = state
            .tasks()
            .create(kind::WORK, json!({"message": "do"}))
            .await
            .unwrap();

        let mut exec_loop = build_loop(&state, Arc::new(StaticRunner("finished".into())));

        // Tick 1: claim + dispatch + run; tick 2: reap the envelope.
        exec_loop.tick().await;
        exec_loop.tick().await;

        let done = state.tasks().get(&task.task_id).await.unwrap().unwrap();
        assert_eq!(done.state, TaskState::Done);

        let notifications = state.tasks().list(Some(kind::NOTIFICATION), None).await.unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].payload["message"], "finished");
    }

    #[tokio::test]
    async fn stop_handle_ends_the_loop() {
        let state = StateStore::in_memory().await.unwrap();
        let exec_loop = build_loop(&state, Arc::new(StaticRunner("x".into())));
        let stop = exec_loop.stop_handle();

        let handle = tokio::spawn(exec_loop.run());
        stop.stop();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("loop should exit after stop")
            .unwrap();
        assert!(stop.is_stopped());
    }
}
