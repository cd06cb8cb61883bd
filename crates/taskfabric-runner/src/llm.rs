//! Language-model API seam.
//!
//! The fabric never talks to a model provider directly; it goes through
//! [`LlmApi`]. Production binds an HTTP client here, tests bind scripted
//! fakes. The implementation is outside this repository's scope — only
//! the contract lives here.

use async_trait::async_trait;

use crate::error::Result;
use crate::tool_api::ToolDefinition;
use crate::types::{LlmRequest, LlmResponse};

/// Contract for turning a conversation into text and tool calls.
#[async_trait]
pub trait LlmApi: Send + Sync {
    /// Produce one response for the request, choosing among `tools`.
    async fn generate(&self, request: &LlmRequest, tools: &[ToolDefinition])
    -> Result<LlmResponse>;

    /// Streaming variant: produce the response plus the raw chunks it was
    /// streamed as. The default collects nothing and falls back to
    /// [`LlmApi::generate`].
    async fn generate_stream(
        &self,
        request: &LlmRequest,
        tools: &[ToolDefinition],
    ) -> Result<(LlmResponse, Vec<String>)> {
        let response = self.generate(request, tools).await?;
        Ok((response, Vec::new()))
    }
}
