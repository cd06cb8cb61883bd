//! # taskfabric-runner
//!
//! Runner strategies for the taskfabric execution fabric.
//!
//! A [`Runner`] is behavior-only: a task and a [`RunnerContext`] go in,
//! one [`RunResult`] comes out. The scheduler treats every strategy
//! uniformly; what differs is how many model calls a strategy spends and
//! how it uses tools:
//!
//! - **[`SingleTurnRunner`]** — one model call, optional tool execution.
//! - **[`ToolLoopRunner`]** — budgeted discover → call → execute loop
//!   with per-step tool discovery.
//! - **[`PdcaRunner`]** — plan / do / check / act cycles with an
//!   accumulated working state.
//!
//! The model ([`LlmApi`]) and tool surface ([`ToolApi`]) are trait seams;
//! their implementations live outside this repository. [`testing`] ships
//! scripted fakes for both.

pub mod context;
pub mod error;
pub mod llm;
pub mod pdca;
pub mod prompts;
pub mod runner;
pub mod single_turn;
pub mod testing;
pub mod tool_api;
pub mod tool_calls;
pub mod tool_loop;
pub mod types;

// ── re-exports ───────────────────────────────────────────────────────

pub use context::{Budget, RunnerContext, RunnerId};
pub use error::{Result, RunnerError};
pub use llm::LlmApi;
pub use pdca::PdcaRunner;
pub use runner::Runner;
pub use single_turn::SingleTurnRunner;
pub use tool_api::{NoTools, ToolApi, ToolDefinition, describe_tools};
pub use tool_calls::{ToolCallOutcome, execute_tool_calls};
pub use tool_loop::ToolLoopRunner;
pub use types::{
    ChatMessage, ErrorInfo, LlmRequest, LlmResponse, LlmToolCall, Role, RunResult, RunState,
    codes, history_to_messages,
};
