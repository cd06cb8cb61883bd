//! Tool API seam.
//!
//! Runner strategies invoke tools uniformly through [`ToolApi`]; the
//! registry, the individual handlers, and the discovery index behind
//! [`ToolApi::search`] are external collaborators. [`NoTools`] is the
//! empty binding used by deployments and tests that run without tools.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Result, RunnerError};

/// A tool exposed to the model.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,
    /// What the tool does, shown to the model.
    pub description: String,
    /// JSON schema of the arguments object.
    pub input_schema: Value,
}

/// Contract for tool execution and discovery.
#[async_trait]
pub trait ToolApi: Send + Sync {
    /// All tool definitions available to the current run.
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Execute a named tool and return its result text.
    async fn execute(&self, tool_name: &str, arguments: Value) -> Result<String>;

    /// Return tool names ranked by relevance to `query`.
    ///
    /// Backed by an external discovery index; the contract is only
    /// "given a query, return ranked names".
    async fn search(&self, query: &str) -> Result<Vec<String>>;
}

/// One-line tool summaries for discovery prompts.
pub fn describe_tools(tools: &dyn ToolApi) -> String {
    let mut text = String::from("tool_list:\n");
    for definition in tools.definitions() {
        text.push_str(&definition.name);
        text.push_str(": ");
        text.push_str(&definition.description);
        text.push('\n');
    }
    text
}

/// A tool binding with no tools.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTools;

#[async_trait]
impl ToolApi for NoTools {
    fn definitions(&self) -> Vec<ToolDefinition> {
        Vec::new()
    }

    async fn execute(&self, tool_name: &str, _arguments: Value) -> Result<String> {
        Err(RunnerError::UnknownTool {
            tool_name: tool_name.to_string(),
        })
    }

    async fn search(&self, _query: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}
