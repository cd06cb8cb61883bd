//! Offline echo model.
//!
//! Stands in for a real model binding so the demo runs with zero
//! configuration. It repeats the last user message back, which is enough
//! to watch tasks travel the main and work paths.

use async_trait::async_trait;

use taskfabric_runner::{
    LlmApi, LlmRequest, LlmResponse, Result, Role, ToolDefinition,
};

/// An `LlmApi` that echoes the last user message.
pub struct EchoLlm;

#[async_trait]
impl LlmApi for EchoLlm {
    async fn generate(
        &self,
        request: &LlmRequest,
        _tools: &[ToolDefinition],
    ) -> Result<LlmResponse> {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("");
        Ok(LlmResponse::text(format!("echo: {last_user}")))
    }
}
