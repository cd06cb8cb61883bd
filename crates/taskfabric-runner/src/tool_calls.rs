//! Batch tool-call execution.
//!
//! Shared by every strategy that lets the model call tools. Failures are
//! converted into error-flagged outcomes fed back to the model; only a
//! panicking tool task aborts the run.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::context::RunnerContext;
use crate::error::{Result, RunnerError};
use crate::types::LlmToolCall;

/// The outcome of one tool call.
#[derive(Debug, Clone)]
pub struct ToolCallOutcome {
    /// Correlates with the model's tool call id.
    pub tool_call_id: String,
    /// The tool that was invoked.
    pub tool_name: String,
    /// Result text (or error description when `is_error`).
    pub content: String,
    /// Whether the call failed.
    pub is_error: bool,
}

/// Execute a batch of tool calls concurrently, returning outcomes in
/// call order.
///
/// When `allowed` is given, calls outside the set are rejected without
/// execution — the per-step toolset discovered for this iteration is the
/// only surface the model may touch.
pub async fn execute_tool_calls(
    ctx: &RunnerContext,
    calls: &[LlmToolCall],
    allowed: Option<&HashSet<String>>,
) -> Result<Vec<ToolCallOutcome>> {
    let mut handles = Vec::with_capacity(calls.len());

    for call in calls {
        if let Some(allowed) = allowed
            && !allowed.contains(&call.name)
        {
            warn!(tool = %call.name, "tool call outside the step toolset rejected");
            let outcome = ToolCallOutcome {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                content: format!("Error: tool `{}` is not available for this step", call.name),
                is_error: true,
            };
            handles.push(tokio::spawn(async move { outcome }));
            continue;
        }

        let tools = Arc::clone(&ctx.tools);
        let tool_name = call.name.clone();
        let tool_id = call.id.clone();
        let arguments = call.arguments.clone();

        handles.push(tokio::spawn(async move {
            debug!(tool = %tool_name, id = %tool_id, "executing tool");

            match tools.execute(&tool_name, arguments).await {
                Ok(content) => ToolCallOutcome {
                    tool_call_id: tool_id,
                    tool_name,
                    content,
                    is_error: false,
                },
                Err(e) => {
                    warn!(tool = %tool_name, error = %e, "tool execution failed");
                    ToolCallOutcome {
                        tool_call_id: tool_id,
                        content: format!("Error: {e}"),
                        tool_name,
                        is_error: true,
                    }
                }
            }
        }));
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        let outcome = handle
            .await
            .map_err(|e| RunnerError::Internal(format!("tool execution task panicked: {e}")))?;
        outcomes.push(outcome);
    }

    Ok(outcomes)
}
