//! Prompt builders for the iterative runner strategies.
//!
//! Plain functions returning strings; templates stay in code so the
//! strategies and their prompts evolve together.

/// Role-dependent framing for the tool-loop step prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptRole {
    /// Answering a user's request on the main path.
    UserRequest,
    /// Working through a background task.
    Work,
    /// Processing a notification task.
    Notification,
}

impl PromptRole {
    /// Map a task type string to the prompt framing, defaulting to the
    /// user-request framing.
    pub fn from_task_type(task_type: &str) -> Self {
        match task_type {
            taskfabric_store::kind::WORK => Self::Work,
            taskfabric_store::kind::NOTIFICATION => Self::Notification,
            _ => Self::UserRequest,
        }
    }

    fn framing(self) -> &'static str {
        match self {
            Self::UserRequest => "You are answering the user's request below.",
            Self::Work => {
                "You are executing a background task. Work autonomously; \
                 your final answer will be delivered to the user as a notification."
            }
            Self::Notification => {
                "You are processing a notification. Decide whether any follow-up \
                 action is needed and summarize the outcome."
            }
        }
    }
}

/// Ask the model which tools the next step needs.
pub fn build_discover_tools_prompt(user_input: &str, tools_text: &str, step_state: &str) -> String {
    format!(
        "Given the request and the progress so far, write one short search query \
         describing the capability the next step needs. Reply with the query text only.\n\n\
         request: {user_input}\n\n{tools_text}\nprogress:\n{step_state}"
    )
}

/// One iteration of the tool loop: act, calling tools if needed.
pub fn build_tool_loop_prompt(role: PromptRole, message: &str, step_state: &str) -> String {
    format!(
        "{}\nUse the available tools when they help. When nothing more is needed, \
         reply with plain text and no tool calls.\n\n\
         request: {message}\n\nprogress:\n{step_state}",
        role.framing()
    )
}

/// Closing call of the tool loop: produce the final answer.
pub fn build_tool_loop_followup_prompt(role: PromptRole, message: &str, step_state: &str) -> String {
    format!(
        "{}\nUsing the tool results above, write the final answer. \
         If the step limit was reached, answer with what you have and say \
         what is still missing.\n\n\
         request: {message}\n\nprogress:\n{step_state}",
        role.framing()
    )
}

/// PDCA plan phase: pick the next step goal.
pub fn build_plan_step_prompt(message: &str, step_state: &str, history: &str) -> String {
    format!(
        "Plan the next step toward completing the task below. Reply with a JSON \
         object: {{\"step_goal\": \"...\", \"step_success_criteria\": \"...\"}}.\n\n\
         task: {message}\n\nstate:\n{step_state}\n\nhistory:\n{history}"
    )
}

/// PDCA discover phase: choose tools for the planned step.
pub fn build_pdca_discover_prompt(step_goal: &str, success_criteria: &str, step_state: &str) -> String {
    format!(
        "For the step below, reply with a JSON object: \
         {{\"search_queries\": [\"...\"], \"selected_tools\": [\"...\"]}}. \
         Leave selected_tools empty to defer to search.\n\n\
         step_goal: {step_goal}\nsuccess_criteria: {success_criteria}\n\nstate:\n{step_state}"
    )
}

/// PDCA do phase: execute the step.
pub fn build_do_step_prompt(
    step_goal: &str,
    success_criteria: &str,
    step_state: &str,
    toolset: &[String],
) -> String {
    format!(
        "Execute this step, calling tools as needed.\n\n\
         step_goal: {step_goal}\nsuccess_criteria: {success_criteria}\n\
         available_tools: {}\n\nstate:\n{step_state}",
        toolset.join(", ")
    )
}

/// PDCA do phase follow-up after tool results came back.
pub fn build_do_followup_prompt(step_goal: &str, success_criteria: &str, step_state: &str) -> String {
    format!(
        "Using the tool results above, state the outcome of this step in plain text.\n\n\
         step_goal: {step_goal}\nsuccess_criteria: {success_criteria}\n\nstate:\n{step_state}"
    )
}

/// PDCA check phase: evaluate the step outcome.
pub fn build_check_step_prompt(
    step_goal: &str,
    success_criteria: &str,
    step_state: &str,
    output: &str,
) -> String {
    format!(
        "Judge whether the step met its success criteria. Reply with a JSON object: \
         {{\"achieved\": true|false, \"evaluation\": \"...\", \"gaps\": [\"...\"]}}.\n\n\
         step_goal: {step_goal}\nsuccess_criteria: {success_criteria}\n\
         output: {output}\n\nstate:\n{step_state}"
    )
}
