//! Scripted fakes for the LLM and tool seams.
//!
//! Used by this crate's strategy tests and by downstream crates that need
//! a runner context without a real model behind it.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use taskfabric_store::{StateStore, Task, TaskState};

use crate::context::{RunnerContext, RunnerId};
use crate::error::{Result, RunnerError};
use crate::llm::LlmApi;
use crate::tool_api::{NoTools, ToolApi, ToolDefinition};
use crate::types::{LlmRequest, LlmResponse};

/// An LLM fake that replays scripted responses and records every request.
///
/// When the script runs dry it answers with empty text, so open-ended
/// loops terminate instead of panicking.
#[derive(Default)]
pub struct FakeLlm {
    responses: Mutex<VecDeque<LlmResponse>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl FakeLlm {
    /// A fake that replays `responses` in order.
    pub fn with_responses(responses: Vec<LlmResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every request seen so far, in call order.
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmApi for FakeLlm {
    async fn generate(
        &self,
        request: &LlmRequest,
        _tools: &[ToolDefinition],
    ) -> Result<LlmResponse> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| LlmResponse::text("")))
    }
}

/// A tool binding with canned definitions, results, and search hits.
pub struct FakeTools {
    definitions: Vec<ToolDefinition>,
    results: HashMap<String, String>,
    search_hits: Vec<String>,
    calls: Mutex<Vec<String>>,
}

impl FakeTools {
    /// Tools named by `names`; each call returns `"ran <name>"` and every
    /// search returns all names.
    pub fn named(names: &[&str]) -> Self {
        Self {
            definitions: names
                .iter()
                .map(|name| ToolDefinition {
                    name: (*name).to_string(),
                    description: format!("fake tool {name}"),
                    input_schema: serde_json::json!({"type": "object"}),
                })
                .collect(),
            results: HashMap::new(),
            search_hits: names.iter().map(|n| (*n).to_string()).collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Override the result text of one tool.
    pub fn with_result(mut self, name: &str, result: &str) -> Self {
        self.results.insert(name.to_string(), result.to_string());
        self
    }

    /// Tool names executed so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolApi for FakeTools {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.definitions.clone()
    }

    async fn execute(&self, tool_name: &str, _arguments: Value) -> Result<String> {
        if !self.definitions.iter().any(|d| d.name == tool_name) {
            return Err(RunnerError::UnknownTool {
                tool_name: tool_name.to_string(),
            });
        }
        self.calls.lock().unwrap().push(tool_name.to_string());
        Ok(self
            .results
            .get(tool_name)
            .cloned()
            .unwrap_or_else(|| format!("ran {tool_name}")))
    }

    async fn search(&self, _query: &str) -> Result<Vec<String>> {
        Ok(self.search_hits.clone())
    }
}

/// A context over an in-memory store with no tools.
pub async fn test_context(runner_id: RunnerId, llm: Arc<dyn LlmApi>) -> RunnerContext {
    test_context_with(runner_id, llm, Arc::new(NoTools)).await
}

/// A context over an in-memory store with the given tool binding.
pub async fn test_context_with(
    runner_id: RunnerId,
    llm: Arc<dyn LlmApi>,
    tools: Arc<dyn ToolApi>,
) -> RunnerContext {
    RunnerContext {
        runner_id,
        conversation_id: "default".to_string(),
        state: StateStore::in_memory().await.expect("in-memory store"),
        tools,
        llm,
        tool_llm: None,
        stream: false,
    }
}

/// A detached `work` task with the given payload, not persisted anywhere.
pub fn work_task(payload: Value) -> Task {
    Task {
        task_id: "task-under-test".to_string(),
        task_type: taskfabric_store::kind::WORK.to_string(),
        payload,
        state: TaskState::Running,
        artifact_refs: Vec::new(),
        claimed_by: Some("test".to_string()),
        claim_expires_at: None,
        created_at: 0,
        updated_at: 0,
    }
}
