//! Core types flowing between the execution fabric and runner strategies.
//!
//! These types are provider-agnostic: the [`crate::LlmApi`] and
//! [`crate::ToolApi`] seams translate them into whatever wire format the
//! bound implementations speak.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use taskfabric_store::Turn;

/// Machine error codes raised inside runner strategies.
pub mod codes {
    /// The task payload carries no usable message text.
    pub const MISSING_MESSAGE: &str = "MISSING_MESSAGE";
    /// The strategy ran out of its internal step budget.
    pub const BUDGET_EXCEEDED: &str = "BUDGET_EXCEEDED";
}

/// A machine-readable error carried in task payloads and run results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine code (e.g. `WORKER_TIMEOUT`).
    pub code: String,
    /// Human-readable description.
    pub message: String,
}

impl ErrorInfo {
    /// Build an error from a code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// The JSON object form merged into task payloads.
    pub fn to_value(&self) -> Value {
        serde_json::json!({ "code": self.code, "message": self.message })
    }
}

/// Terminal outcome of a run, as reported back to the fabric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// The run produced a usable result.
    Done,
    /// The run failed; `error` explains why.
    Failed,
}

/// The single result every runner produces per task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    /// Text surfaced to the user (main path: the reply; worker path: the
    /// notification body).
    pub user_output: Option<String>,
    /// Terminal outcome.
    pub state: RunState,
    /// Artifacts produced during the run.
    #[serde(default)]
    pub artifact_refs: Vec<String>,
    /// Failure details when `state` is `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    /// Streamed chunks collected on the main path when streaming was
    /// requested; joined they equal (or supersede) `user_output`.
    #[serde(default)]
    pub stream_chunks: Vec<String>,
}

impl RunResult {
    /// A successful result with the given user-facing output.
    pub fn done(user_output: impl Into<String>) -> Self {
        Self {
            user_output: Some(user_output.into()),
            state: RunState::Done,
            artifact_refs: Vec::new(),
            error: None,
            stream_chunks: Vec::new(),
        }
    }

    /// A successful result with no user-facing output.
    pub fn done_silent() -> Self {
        Self {
            user_output: None,
            state: RunState::Done,
            artifact_refs: Vec::new(),
            error: None,
            stream_chunks: Vec::new(),
        }
    }

    /// A failed result with a machine code and message.
    pub fn failed(code: &str, message: &str) -> Self {
        Self {
            user_output: None,
            state: RunState::Failed,
            artifact_refs: Vec::new(),
            error: Some(ErrorInfo::new(code, message)),
            stream_chunks: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Chat messages
// ---------------------------------------------------------------------------

/// The role of a participant in a model conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Input from the human user.
    User,
    /// Output from the model.
    Assistant,
    /// Result of a tool invocation, fed back to the model.
    Tool,
}

/// A single message in a model conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who produced this message.
    pub role: Role,
    /// Textual content. Empty for assistant messages that only carry
    /// tool calls.
    #[serde(default)]
    pub content: String,
    /// Tool calls requested by the assistant.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<LlmToolCall>,
    /// Which tool call this message answers (tool role only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create an assistant text message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create an assistant message that carries tool calls.
    pub fn assistant_tool_calls(tool_calls: Vec<LlmToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            tool_calls,
            tool_call_id: None,
        }
    }

    /// Create a tool result message.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// Convert conversation turns into chat messages, oldest first.
pub fn history_to_messages(turns: &[Turn]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(turns.len() * 2);
    for turn in turns {
        messages.push(ChatMessage::user(&turn.user_message));
        if let Some(assistant) = &turn.assistant_message {
            messages.push(ChatMessage::assistant(assistant));
        }
    }
    messages
}

// ---------------------------------------------------------------------------
// LLM request/response
// ---------------------------------------------------------------------------

/// A request to the language model seam.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    /// The conversation to continue.
    pub messages: Vec<ChatMessage>,
}

impl LlmRequest {
    /// A request with the given messages.
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self { messages }
    }

    /// A request with a single user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::user(content)],
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmToolCall {
    /// Identifier assigned by the model for correlating results.
    pub id: String,
    /// The tool to invoke.
    pub name: String,
    /// JSON arguments.
    pub arguments: Value,
}

/// The model's answer: text, tool calls, or both.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmResponse {
    /// Text output, if any.
    pub text: Option<String>,
    /// Requested tool calls, if any.
    #[serde(default)]
    pub tool_calls: Vec<LlmToolCall>,
}

impl LlmResponse {
    /// A text-only response.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            text: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }
}

/// The assistant message form of a response: tool calls when present,
/// plain text otherwise.
pub(crate) fn ensure_assistant_message(response: &LlmResponse) -> ChatMessage {
    if response.tool_calls.is_empty() {
        ChatMessage::assistant(response.text.clone().unwrap_or_default())
    } else {
        ChatMessage::assistant_tool_calls(response.tool_calls.clone())
    }
}

/// Parse model output that is expected to be a JSON object, tolerating
/// plain text by returning an empty object.
pub(crate) fn safe_json_object(text: Option<&str>) -> serde_json::Map<String, Value> {
    text.and_then(|t| serde_json::from_str::<Value>(t).ok())
        .and_then(|v| match v {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
