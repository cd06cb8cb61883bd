//! Tool-loop runner: budgeted discover → call → execute iterations.
//!
//! Each iteration first asks the discovery model for a search query, maps
//! it to a step toolset via [`crate::ToolApi::search`], then lets the
//! primary model act with only that toolset exposed. The loop ends when
//! the model answers without tool calls or the budget runs out; either
//! way a closing call produces the final answer from the accumulated
//! tool results.

use std::collections::HashSet;

use async_trait::async_trait;
use tracing::{debug, warn};

use taskfabric_store::Task;

use crate::context::{Budget, RunnerContext, RunnerId};
use crate::error::Result;
use crate::prompts::{
    PromptRole, build_discover_tools_prompt, build_tool_loop_followup_prompt,
    build_tool_loop_prompt,
};
use crate::runner::Runner;
use crate::tool_api::describe_tools;
use crate::tool_calls::execute_tool_calls;
use crate::types::{
    ChatMessage, LlmRequest, RunResult, RunState, codes, ensure_assistant_message,
    history_to_messages,
};

/// Tool message injected when the step budget runs out, steering the
/// closing call toward an honest partial answer.
const BUDGET_EXCEEDED_NOTE: &str = "{\"error\":\"Step budget exceeded; stop using tools and \
answer with the results gathered so far, noting what is incomplete.\",\"code\":\"BUDGET_EXCEEDED\"}";

/// Iterative tool-use strategy with per-step tool discovery.
#[derive(Debug, Clone)]
pub struct ToolLoopRunner {
    /// Step budget when the payload does not carry one.
    pub default_budget: i64,
    /// How many recent turns of history the main path includes.
    pub history_limit: i64,
}

impl Default for ToolLoopRunner {
    fn default() -> Self {
        Self {
            default_budget: 10,
            history_limit: 5,
        }
    }
}

#[async_trait]
impl Runner for ToolLoopRunner {
    async fn run(&self, task: &Task, ctx: &RunnerContext) -> Result<RunResult> {
        let Some(message) = task.message() else {
            return Ok(RunResult::failed(codes::MISSING_MESSAGE, "message is required"));
        };
        let message = message.to_string();

        let mut budget = Budget::from_payload(&task.payload, self.default_budget);
        let role = PromptRole::from_task_type(&task.task_type);

        let history_messages = if ctx.runner_id == RunnerId::Main {
            let recent = ctx
                .state
                .turns()
                .list_recent(&ctx.conversation_id, self.history_limit)
                .await?;
            history_to_messages(&recent)
        } else {
            Vec::new()
        };

        let all_tools = ctx.tools.definitions();
        let mut tool_messages: Vec<ChatMessage> = Vec::new();
        let mut tool_summary = String::new();
        let mut completed = false;

        while !budget.exhausted() {
            let step_state = step_state_text(&tool_summary, &budget);

            let toolset = self
                .discover_step_tools(ctx, &message, &step_state, &history_messages, &tool_messages)
                .await?;
            debug!(task_id = %task.task_id, ?toolset, "step toolset selected");

            let prompt = build_tool_loop_prompt(role, &message, &step_state);
            let mut messages = history_messages.clone();
            messages.push(ChatMessage::user(prompt));
            messages.extend(tool_messages.iter().cloned());

            let allowed_defs: Vec<_> = all_tools
                .iter()
                .filter(|t| toolset.contains(&t.name))
                .cloned()
                .collect();
            let response = ctx
                .llm
                .generate(&LlmRequest::new(messages), &allowed_defs)
                .await?;

            if !response.tool_calls.is_empty() {
                tool_messages.push(ensure_assistant_message(&response));
            }
            let outcomes = execute_tool_calls(ctx, &response.tool_calls, Some(&toolset)).await?;
            for outcome in &outcomes {
                tool_messages.push(ChatMessage::tool_result(&outcome.tool_call_id, &outcome.content));
                tool_summary = outcome.content.clone();
            }

            budget.spend();

            if response.tool_calls.is_empty() {
                completed = true;
                break;
            }
        }

        if !completed && budget.exhausted() {
            warn!(task_id = %task.task_id, "step budget exceeded");
            tool_messages.push(ChatMessage::tool_result("system", BUDGET_EXCEEDED_NOTE));
        }

        let final_prompt =
            build_tool_loop_followup_prompt(role, &message, &step_state_text(&tool_summary, &budget));
        let mut messages = history_messages;
        messages.push(ChatMessage::user(final_prompt));
        messages.extend(tool_messages);

        let final_response = ctx.llm.generate(&LlmRequest::new(messages), &[]).await?;

        Ok(RunResult {
            user_output: final_response.text,
            state: RunState::Done,
            artifact_refs: Vec::new(),
            error: None,
            stream_chunks: Vec::new(),
        })
    }
}

impl ToolLoopRunner {
    /// Ask the discovery model for a search query and map it to tool names.
    async fn discover_step_tools(
        &self,
        ctx: &RunnerContext,
        message: &str,
        step_state: &str,
        history_messages: &[ChatMessage],
        tool_messages: &[ChatMessage],
    ) -> Result<HashSet<String>> {
        let tools_text = describe_tools(&*ctx.tools);
        let prompt = build_discover_tools_prompt(message, &tools_text, step_state);

        let mut messages = history_messages.to_vec();
        messages.extend(tool_messages.iter().cloned());
        messages.push(ChatMessage::user(prompt));

        let response = ctx
            .discovery_llm()
            .generate(&LlmRequest::new(messages), &[])
            .await?;
        let query = response.text.unwrap_or_default();
        debug!(query = %query, "tool discovery query");

        Ok(ctx.tools.search(&query).await?.into_iter().collect())
    }
}

fn step_state_text(tool_summary: &str, budget: &Budget) -> String {
    format!(
        "- tool_summary: {tool_summary}\n- remaining_steps: {}\n- spent_steps: {}\n",
        budget.remaining_steps, budget.spent_steps
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeLlm, FakeTools, test_context_with, work_task};
    use crate::types::{LlmResponse, LlmToolCall};
    use serde_json::json;
    use std::sync::Arc;

    fn tool_call(name: &str) -> LlmToolCall {
        LlmToolCall {
            id: format!("call-{name}"),
            name: name.to_string(),
            arguments: json!({}),
        }
    }

    #[tokio::test]
    async fn missing_message_fails() {
        let ctx = test_context_with(
            RunnerId::Worker,
            Arc::new(FakeLlm::default()),
            Arc::new(FakeTools::named(&[])),
        )
        .await;
        let task = work_task(json!({}));

        let result = ToolLoopRunner::default().run(&task, &ctx).await.unwrap();
        assert_eq!(result.state, RunState::Failed);
        assert_eq!(result.error.unwrap().code, codes::MISSING_MESSAGE);
    }

    #[tokio::test]
    async fn loops_through_tools_then_finalizes() {
        // discover → "lookup", step → one tool call, discover again, step →
        // plain text, finalize → final answer.
        let llm = Arc::new(FakeLlm::with_responses(vec![
            LlmResponse::text("lookup query"),
            LlmResponse {
                text: None,
                tool_calls: vec![tool_call("lookup")],
            },
            LlmResponse::text("lookup query"),
            LlmResponse::text("found it"),
            LlmResponse::text("final answer"),
        ]));
        let tools = Arc::new(FakeTools::named(&["lookup"]).with_result("lookup", "42"));
        let ctx = test_context_with(RunnerId::Worker, llm.clone(), tools.clone()).await;

        let task = work_task(json!({"message": "find the number"}));
        let result = ToolLoopRunner::default().run(&task, &ctx).await.unwrap();

        assert_eq!(result.state, RunState::Done);
        assert_eq!(result.user_output.as_deref(), Some("final answer"));
        assert_eq!(tools.calls(), vec!["lookup".to_string()]);
    }

    #[tokio::test]
    async fn budget_exhaustion_injects_note_and_still_answers() {
        // Budget of 1: the single step calls a tool, the loop ends
        // uncompleted, the finalize call still runs.
        let llm = Arc::new(FakeLlm::with_responses(vec![
            LlmResponse::text("query"),
            LlmResponse {
                text: None,
                tool_calls: vec![tool_call("lookup")],
            },
            LlmResponse::text("partial answer"),
        ]));
        let tools = Arc::new(FakeTools::named(&["lookup"]));
        let ctx = test_context_with(RunnerId::Worker, llm.clone(), tools).await;

        let task = work_task(json!({"message": "m", "budget": {"remaining_steps": 1}}));
        let result = ToolLoopRunner::default().run(&task, &ctx).await.unwrap();

        assert_eq!(result.state, RunState::Done);
        assert_eq!(result.user_output.as_deref(), Some("partial answer"));

        // The finalize request carries the budget-exceeded tool note.
        let requests = llm.requests();
        let last = requests.last().unwrap();
        assert!(
            last.messages
                .iter()
                .any(|m| m.content.contains("BUDGET_EXCEEDED"))
        );
    }

    #[tokio::test]
    async fn calls_outside_toolset_are_rejected() {
        let llm = Arc::new(FakeLlm::with_responses(vec![
            LlmResponse::text("query"),
            LlmResponse {
                text: None,
                tool_calls: vec![tool_call("forbidden")],
            },
            LlmResponse::text("query"),
            LlmResponse::text("done"),
            LlmResponse::text("final"),
        ]));
        // "forbidden" exists but search never returns it.
        let tools = Arc::new(FakeTools::named(&[]));
        let ctx = test_context_with(RunnerId::Worker, llm.clone(), tools.clone()).await;

        let task = work_task(json!({"message": "m"}));
        let result = ToolLoopRunner::default().run(&task, &ctx).await.unwrap();

        assert_eq!(result.state, RunState::Done);
        assert!(tools.calls().is_empty(), "rejected call must not execute");
    }
}
