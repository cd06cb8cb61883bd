//! Single-turn runner: one model call, optional tool execution, done.
//!
//! The simplest strategy — suited to conversational main-path traffic
//! where the model either answers directly or fires a handful of tool
//! calls whose results are summarized verbatim.

use async_trait::async_trait;
use tracing::debug;

use taskfabric_store::Task;

use crate::context::{RunnerContext, RunnerId};
use crate::error::Result;
use crate::runner::Runner;
use crate::tool_calls::execute_tool_calls;
use crate::types::{ChatMessage, LlmRequest, RunResult, RunState, codes, history_to_messages};

/// One LLM call per task.
#[derive(Debug, Clone)]
pub struct SingleTurnRunner {
    /// How many recent turns of history the main path includes.
    pub history_limit: i64,
}

impl Default for SingleTurnRunner {
    fn default() -> Self {
        Self { history_limit: 5 }
    }
}

#[async_trait]
impl Runner for SingleTurnRunner {
    async fn run(&self, task: &Task, ctx: &RunnerContext) -> Result<RunResult> {
        let Some(message) = task.message() else {
            return Ok(RunResult::failed(codes::MISSING_MESSAGE, "message is required"));
        };

        let mut messages = Vec::new();
        if ctx.runner_id == RunnerId::Main {
            let recent = ctx
                .state
                .turns()
                .list_recent(&ctx.conversation_id, self.history_limit)
                .await?;
            messages.extend(history_to_messages(&recent));
        }
        messages.push(ChatMessage::user(message));

        let request = LlmRequest::new(messages);
        let tools = ctx.tools.definitions();

        let (response, stream_chunks) = if ctx.stream {
            ctx.llm.generate_stream(&request, &tools).await?
        } else {
            (ctx.llm.generate(&request, &tools).await?, Vec::new())
        };

        let mut user_output = response.text.clone();
        if !response.tool_calls.is_empty() {
            debug!(task_id = %task.task_id, count = response.tool_calls.len(), "executing tool calls");
            let outcomes = execute_tool_calls(ctx, &response.tool_calls, None).await?;
            if user_output.is_none() && !outcomes.is_empty() {
                let joined = outcomes
                    .iter()
                    .map(|o| format!("{}: {}", o.tool_name, o.content))
                    .collect::<Vec<_>>()
                    .join("\n");
                user_output = Some(format!("Tool results:\n{joined}"));
            }
        }

        Ok(RunResult {
            user_output,
            state: RunState::Done,
            artifact_refs: Vec::new(),
            error: None,
            stream_chunks,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
