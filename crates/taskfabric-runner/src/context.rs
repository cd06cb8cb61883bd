//! Runner invocation context.

use std::sync::Arc;

use serde_json::Value;
use taskfabric_store::StateStore;

use crate::llm::LlmApi;
use crate::tool_api::ToolApi;

/// Which execution path is invoking the runner.
///
/// Strategies use this to decide path-specific behavior — the main path
/// sees conversation history, the worker path delivers its final output
/// through notification tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerId {
    /// The synchronous, user-facing request/response path.
    Main,
    /// The background worker path.
    Worker,
}

impl RunnerId {
    /// The claimer-id string recorded on task leases.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Worker => "worker",
        }
    }
}

/// Everything a runner needs to execute one task.
///
/// Built fresh per invocation by the session (main path) or the worker
/// pool (work path); the handles inside are shared process-wide.
#[derive(Clone)]
pub struct RunnerContext {
    /// The invoking path.
    pub runner_id: RunnerId,
    /// The conversation whose history the main path reads.
    pub conversation_id: String,
    /// Shared state substrate handle.
    pub state: StateStore,
    /// Tool execution and discovery.
    pub tools: Arc<dyn ToolApi>,
    /// The primary language model.
    pub llm: Arc<dyn LlmApi>,
    /// Optional cheaper model used for tool discovery; falls back to
    /// `llm` when absent.
    pub tool_llm: Option<Arc<dyn LlmApi>>,
    /// Whether the caller wants streamed chunks collected.
    pub stream: bool,
}

impl RunnerContext {
    /// The model used for tool-discovery calls.
    pub fn discovery_llm(&self) -> &Arc<dyn LlmApi> {
        self.tool_llm.as_ref().unwrap_or(&self.llm)
    }
}

/// Step budget for iterative strategies.
///
/// Read from `payload.budget` when present so producers can bound
/// individual tasks; burns one step per loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Budget {
    /// Steps left before the strategy must stop.
    pub remaining_steps: i64,
    /// Steps consumed so far.
    pub spent_steps: i64,
}

impl Budget {
    /// A fresh budget of `steps`.
    pub fn new(steps: i64) -> Self {
        Self {
            remaining_steps: steps,
            spent_steps: 0,
        }
    }

    /// Read the budget from a task payload, defaulting to `default_steps`.
    pub fn from_payload(payload: &Value, default_steps: i64) -> Self {
        let budget = payload.get("budget");
        let remaining = budget
            .and_then(|b| b.get("remaining_steps"))
            .and_then(Value::as_i64)
            .unwrap_or(default_steps);
        let spent = budget
            .and_then(|b| b.get("spent_steps"))
            .and_then(Value::as_i64)
            .unwrap_or(0);
        Self {
            remaining_steps: remaining,
            spent_steps: spent,
        }
    }

    /// Burn one step.
    pub fn spend(&mut self) {
        self.spent_steps += 1;
        self.remaining_steps -= 1;
    }

    /// Whether any steps remain.
    pub fn exhausted(&self) -> bool {
        self.remaining_steps <= 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn budget_defaults_when_payload_silent() {
        let budget = Budget::from_payload(&json!({"message": "m"}), 10);
        assert_eq!(budget.remaining_steps, 10);
        assert_eq!(budget.spent_steps, 0);
    }

    #[test]
    fn budget_reads_payload_override() {
        let budget = Budget::from_payload(
            &json!({"budget": {"remaining_steps": 3, "spent_steps": 2}}),
            10,
        );
        assert_eq!(budget.remaining_steps, 3);
        assert_eq!(budget.spent_steps, 2);
    }

    #[test]
    fn budget_spend_and_exhaustion() {
        let mut budget = Budget::new(2);
        assert!(!budget.exhausted());
        budget.spend();
        budget.spend();
        assert!(budget.exhausted());
        assert_eq!(budget.spent_steps, 2);
    }
}
