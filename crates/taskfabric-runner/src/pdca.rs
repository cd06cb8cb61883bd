//! Plan → Do → Check → Act runner.
//!
//! Each cycle plans one step with explicit success criteria, discovers
//! the tools it needs, executes, and has the model judge the outcome
//! against the criteria. The accumulated [`StepContext`] — facts, open
//! issues, current plan — feeds the next cycle. On the worker path the
//! final message is delivered as a notification task directly, so the
//! dispatcher's own completion notification is not duplicated.

use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use taskfabric_store::{Task, kind};

use crate::context::{Budget, RunnerContext, RunnerId};
use crate::error::Result;
use crate::prompts::{
    build_check_step_prompt, build_do_followup_prompt, build_do_step_prompt,
    build_pdca_discover_prompt, build_plan_step_prompt,
};
use crate::runner::Runner;
use crate::tool_calls::execute_tool_calls;
use crate::types::{
    ChatMessage, LlmRequest, LlmResponse, RunResult, codes, ensure_assistant_message,
    history_to_messages, safe_json_object,
};

/// Working state carried across PDCA cycles.
#[derive(Debug, Clone, Default)]
struct StepContext {
    facts: Vec<String>,
    open_issues: Vec<String>,
    plan: Vec<String>,
    last_result: String,
}

impl StepContext {
    fn from_payload(payload: &Value) -> Self {
        let ctx = payload.get("step_context");
        let strings = |key: &str| -> Vec<String> {
            ctx.and_then(|c| c.get(key))
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default()
        };
        Self {
            facts: strings("facts"),
            open_issues: strings("open_issues"),
            plan: strings("plan"),
            last_result: ctx
                .and_then(|c| c.get("last_result"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }
    }

    fn state_text(&self, budget: &Budget) -> String {
        format!(
            "- facts: {:?}\n- open_issues: {:?}\n- plan: {:?}\n- last_result: {}\n\
             - remaining_steps: {}\n- spent_steps: {}\n",
            self.facts,
            self.open_issues,
            self.plan,
            self.last_result,
            budget.remaining_steps,
            budget.spent_steps
        )
    }

    /// The Act phase: fold the Check verdict back into the working state.
    fn absorb(&mut self, step_goal: &str, evaluation: String, gaps: Vec<String>) {
        self.last_result = evaluation.clone();
        self.plan = if gaps.is_empty() {
            vec![step_goal.to_string()]
        } else {
            gaps.clone()
        };
        self.open_issues = gaps;
        if !evaluation.is_empty() && !self.facts.contains(&evaluation) {
            self.facts.push(evaluation);
        }
    }
}

/// Plan/Do/Check/Act strategy.
#[derive(Debug, Clone)]
pub struct PdcaRunner {
    /// Step budget when the payload does not carry one.
    pub default_budget: i64,
    /// How many recent turns of history the main path includes.
    pub history_limit: i64,
}

impl Default for PdcaRunner {
    fn default() -> Self {
        Self {
            default_budget: 10,
            history_limit: 5,
        }
    }
}

#[async_trait]
impl Runner for PdcaRunner {
    async fn run(&self, task: &Task, ctx: &RunnerContext) -> Result<RunResult> {
        let Some(message) = task.message() else {
            return Ok(RunResult::failed(codes::MISSING_MESSAGE, "message is required"));
        };
        let message = message.to_string();

        let mut budget = Budget::from_payload(&task.payload, self.default_budget);
        let mut step_context = StepContext::from_payload(&task.payload);

        let history_text = if ctx.runner_id == RunnerId::Main {
            let recent = ctx
                .state
                .turns()
                .list_recent(&ctx.conversation_id, self.history_limit)
                .await?;
            history_to_messages(&recent)
                .iter()
                .map(|m| m.content.clone())
                .collect::<Vec<_>>()
                .join("\n")
        } else {
            String::new()
        };

        while !budget.exhausted() {
            let (step_goal, success_criteria) =
                self.plan_step(ctx, &message, &step_context, &budget, &history_text).await?;
            info!(task_id = %task.task_id, step_goal = %step_goal, "pdca step planned");

            let toolset = self
                .discover_step_tools(ctx, &step_goal, &success_criteria, &step_context, &budget)
                .await?;
            debug!(?toolset, "pdca step toolset");

            let do_response = self
                .do_step(ctx, &step_goal, &success_criteria, &step_context, &budget, &toolset)
                .await?;

            let (achieved, evaluation, gaps) = self
                .check_step(ctx, &step_goal, &success_criteria, &step_context, &budget, &do_response)
                .await?;

            step_context.absorb(&step_goal, evaluation.clone(), gaps);
            budget.spend();

            if achieved {
                let final_message = do_response.text.unwrap_or(evaluation);
                if ctx.runner_id == RunnerId::Worker {
                    // Deliver directly and stay silent toward the dispatcher,
                    // which would otherwise create a second notification.
                    ctx.state
                        .tasks()
                        .create(
                            kind::NOTIFICATION,
                            serde_json::json!({
                                "message": final_message,
                                "severity": "info",
                                "related_task_id": task.task_id,
                            }),
                        )
                        .await?;
                    return Ok(RunResult::done_silent());
                }
                return Ok(RunResult::done(final_message));
            }
        }

        warn!(task_id = %task.task_id, "pdca budget exceeded");
        Ok(RunResult::failed(codes::BUDGET_EXCEEDED, "Step budget exceeded."))
    }
}

impl PdcaRunner {
    async fn plan_step(
        &self,
        ctx: &RunnerContext,
        message: &str,
        step_context: &StepContext,
        budget: &Budget,
        history_text: &str,
    ) -> Result<(String, String)> {
        let prompt = build_plan_step_prompt(message, &step_context.state_text(budget), history_text);
        let response = ctx.llm.generate(&LlmRequest::user(prompt), &[]).await?;

        let plan = safe_json_object(response.text.as_deref());
        let step_goal = plan
            .get("step_goal")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| response.text.clone())
            .unwrap_or_default();
        let success_criteria = plan
            .get("step_success_criteria")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok((step_goal, success_criteria))
    }

    async fn discover_step_tools(
        &self,
        ctx: &RunnerContext,
        step_goal: &str,
        success_criteria: &str,
        step_context: &StepContext,
        budget: &Budget,
    ) -> Result<HashSet<String>> {
        let prompt =
            build_pdca_discover_prompt(step_goal, success_criteria, &step_context.state_text(budget));
        let response = ctx
            .discovery_llm()
            .generate(&LlmRequest::user(prompt), &ctx.tools.definitions())
            .await?;

        let discover = safe_json_object(response.text.as_deref());
        let queries: Vec<String> = discover
            .get("search_queries")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let mut searched: HashSet<String> = HashSet::new();
        for query in &queries {
            searched.extend(ctx.tools.search(query).await?);
        }

        let selected: HashSet<String> = discover
            .get("selected_tools")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(if selected.is_empty() { searched } else { selected })
    }

    async fn do_step(
        &self,
        ctx: &RunnerContext,
        step_goal: &str,
        success_criteria: &str,
        step_context: &StepContext,
        budget: &Budget,
        toolset: &HashSet<String>,
    ) -> Result<LlmResponse> {
        let mut sorted: Vec<String> = toolset.iter().cloned().collect();
        sorted.sort();

        let prompt = build_do_step_prompt(
            step_goal,
            success_criteria,
            &step_context.state_text(budget),
            &sorted,
        );
        let mut messages = vec![ChatMessage::user(prompt)];

        let allowed_defs: Vec<_> = ctx
            .tools
            .definitions()
            .into_iter()
            .filter(|t| toolset.contains(&t.name))
            .collect();
        let response = ctx
            .llm
            .generate(&LlmRequest::new(messages.clone()), &allowed_defs)
            .await?;

        if response.tool_calls.is_empty() {
            return Ok(response);
        }

        messages.push(ensure_assistant_message(&response));
        let outcomes = execute_tool_calls(ctx, &response.tool_calls, Some(toolset)).await?;
        for outcome in outcomes {
            messages.push(ChatMessage::tool_result(outcome.tool_call_id, outcome.content));
        }
        messages.push(ChatMessage::user(build_do_followup_prompt(
            step_goal,
            success_criteria,
            &step_context.state_text(budget),
        )));

        ctx.llm.generate(&LlmRequest::new(messages), &[]).await
    }

    async fn check_step(
        &self,
        ctx: &RunnerContext,
        step_goal: &str,
        success_criteria: &str,
        step_context: &StepContext,
        budget: &Budget,
        do_response: &LlmResponse,
    ) -> Result<(bool, String, Vec<String>)> {
        let output = do_response.text.as_deref().unwrap_or("").trim().to_string();
        if output.is_empty() {
            return Ok((false, "empty_output".to_string(), vec!["empty_output".to_string()]));
        }

        let prompt = build_check_step_prompt(
            step_goal,
            success_criteria,
            &step_context.state_text(budget),
            &output,
        );
        let response = ctx.llm.generate(&LlmRequest::user(prompt), &[]).await?;

        let check = safe_json_object(response.text.as_deref());
        let achieved = check.get("achieved").and_then(Value::as_bool).unwrap_or(false);
        let evaluation = check
            .get("evaluation")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| response.text.clone())
            .unwrap_or_default();
        let gaps = check
            .get("gaps")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok((achieved, evaluation, gaps))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeLlm, FakeTools, test_context_with, work_task};
    use crate::types::RunState;
    use serde_json::json;
    use std::sync::Arc;

    fn achieved_cycle_responses(answer: &str) -> Vec<LlmResponse> {
        vec![
            // plan
            LlmResponse::text(r#"{"step_goal": "answer", "step_success_criteria": "answered"}"#),
            // discover
            LlmResponse::text(r#"{"search_queries": [], "selected_tools": []}"#),
            // do (no tool calls)
            LlmResponse::text(answer),
            // check
            LlmResponse::text(r#"{"achieved": true, "evaluation": "looks right", "gaps": []}"#),
        ]
    }

    #[tokio::test]
    async fn missing_message_fails() {
        let ctx = test_context_with(
            RunnerId::Main,
            Arc::new(FakeLlm::default()),
            Arc::new(FakeTools::named(&[])),
        )
        .await;

        let result = PdcaRunner::default().run(&work_task(json!({})), &ctx).await.unwrap();
        assert_eq!(result.state, RunState::Failed);
        assert_eq!(result.error.unwrap().code, codes::MISSING_MESSAGE);
    }

    #[tokio::test]
    async fn main_path_returns_final_message() {
        let llm = Arc::new(FakeLlm::with_responses(achieved_cycle_responses("the report")));
        let ctx = test_context_with(RunnerId::Main, llm, Arc::new(FakeTools::named(&[]))).await;

        let result = PdcaRunner::default()
            .run(&work_task(json!({"message": "write the report"})), &ctx)
            .await
            .unwrap();

        assert_eq!(result.state, RunState::Done);
        assert_eq!(result.user_output.as_deref(), Some("the report"));
    }

    #[tokio::test]
    async fn worker_path_delivers_via_notification() {
        let llm = Arc::new(FakeLlm::with_responses(achieved_cycle_responses("nightly summary")));
        let ctx = test_context_with(RunnerId::Worker, llm, Arc::new(FakeTools::named(&[]))).await;

        let result = PdcaRunner::default()
            .run(&work_task(json!({"message": "summarize"})), &ctx)
            .await
            .unwrap();

        // Silent toward the dispatcher, loud toward the store.
        assert_eq!(result.state, RunState::Done);
        assert!(result.user_output.is_none());

        let notifications = ctx
            .state
            .tasks()
            .list(Some(kind::NOTIFICATION), None)
            .await
            .unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].payload["message"], "nightly summary");
        assert_eq!(notifications[0].payload["related_task_id"], "task-under-test");
    }

    #[tokio::test]
    async fn budget_exhaustion_fails_with_code() {
        // Every check says not achieved; budget of 2 burns out.
        let llm = Arc::new(FakeLlm::with_responses(vec![
            LlmResponse::text(r#"{"step_goal": "g", "step_success_criteria": "c"}"#),
            LlmResponse::text("{}"),
            LlmResponse::text("attempt one"),
            LlmResponse::text(r#"{"achieved": false, "evaluation": "not yet", "gaps": ["missing data"]}"#),
            LlmResponse::text(r#"{"step_goal": "g2", "step_success_criteria": "c2"}"#),
            LlmResponse::text("{}"),
            LlmResponse::text("attempt two"),
            LlmResponse::text(r#"{"achieved": false, "evaluation": "still not", "gaps": []}"#),
        ]));
        let ctx = test_context_with(RunnerId::Main, llm, Arc::new(FakeTools::named(&[]))).await;

        let result = PdcaRunner::default()
            .run(&work_task(json!({"message": "m", "budget": {"remaining_steps": 2}})), &ctx)
            .await
            .unwrap();

        assert_eq!(result.state, RunState::Failed);
        assert_eq!(result.error.unwrap().code, codes::BUDGET_EXCEEDED);
    }

    #[tokio::test]
    async fn empty_do_output_counts_as_unachieved() {
        let llm = Arc::new(FakeLlm::with_responses(vec![
            LlmResponse::text(r#"{"step_goal": "g", "step_success_criteria": "c"}"#),
            LlmResponse::text("{}"),
            // do returns empty text → check is skipped entirely
            LlmResponse::text(""),
        ]));
        let ctx = test_context_with(RunnerId::Main, llm, Arc::new(FakeTools::named(&[]))).await;

        let result = PdcaRunner::default()
            .run(&work_task(json!({"message": "m", "budget": {"remaining_steps": 1}})), &ctx)
            .await
            .unwrap();

        assert_eq!(result.state, RunState::Failed);
    }
}
