//! Task data model.
//!
//! A task is the fundamental unit of scheduled work: identity, state,
//! JSON payload, artifact references, and a claim lease. Task types are
//! open strings so runner-internal sub-types remain representable; the
//! well-known types used by the execution fabric live in [`kind`].

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known task type strings.
pub mod kind {
    /// A synchronous main-path request from the user.
    pub const USER_REQUEST: &str = "user_request";
    /// A background work item picked up by the dispatcher.
    pub const WORK: &str = "work";
    /// A message surfaced to the user by the session's drain.
    pub const NOTIFICATION: &str = "notification";
}

/// Current unix timestamp in milliseconds.
pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Created and waiting to be claimed.
    Queued,
    /// Claimed by a worker; `claimed_by` and `claim_expires_at` are set.
    Running,
    /// Finished successfully. Terminal.
    Done,
    /// Finished with an error. Terminal.
    Failed,
}

impl TaskState {
    /// The string form stored in SQLite.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Parse the stored string form. Unknown strings return `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether this state admits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier (UUID v7), stable across updates.
    pub task_id: String,
    /// Task type string; see [`kind`] for the well-known values.
    pub task_type: String,
    /// JSON object payload.
    pub payload: Value,
    /// Current lifecycle state.
    pub state: TaskState,
    /// Ordered artifact ids associated with this task.
    pub artifact_refs: Vec<String>,
    /// Identifier of the current claimer, if any.
    pub claimed_by: Option<String>,
    /// Unix milliseconds when the current claim lease expires.
    pub claim_expires_at: Option<i64>,
    /// Unix milliseconds when the task was created.
    pub created_at: i64,
    /// Unix milliseconds when the task was last updated.
    pub updated_at: i64,
}

impl Task {
    /// Whether the task currently holds an unexpired claim lease.
    pub fn has_live_lease(&self, now_ms: i64) -> bool {
        match (&self.claimed_by, self.claim_expires_at) {
            (Some(_), Some(expires)) => expires > now_ms,
            _ => false,
        }
    }

    /// Decode the payload as a [`WorkPayload`].
    pub fn work_payload(&self) -> Option<WorkPayload> {
        serde_json::from_value(self.payload.clone()).ok()
    }

    /// The `message` field of the payload, used by runners as the task's
    /// instruction text. Covers both `message` (work/notification) and
    /// `user_message` (user_request) payload shapes.
    pub fn message(&self) -> Option<&str> {
        self.payload
            .get("message")
            .or_else(|| self.payload.get("user_message"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// The `meta` object of the payload, if present.
    pub fn meta(&self) -> Option<&Value> {
        self.payload.get("meta").filter(|v| !v.is_null())
    }
}

// ---------------------------------------------------------------------------
// Payload views
// ---------------------------------------------------------------------------

/// Payload of a `user_request` task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRequestPayload {
    /// The user's message text.
    pub user_message: String,
    /// Producer-supplied metadata carried through to the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// Payload of a `work` task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkPayload {
    /// The instruction for the worker-path runner.
    #[serde(default)]
    pub message: String,
    /// ISO-8601 timestamp before which the task must not be dispatched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_at: Option<String>,
    /// Reschedule interval, clamped to at least 3600 seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_interval_seconds: Option<i64>,
    /// Whether the task is rescheduled after completing.
    #[serde(default)]
    pub repeat_enabled: bool,
    /// Producer-supplied metadata propagated into the completion notification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl WorkPayload {
    /// Whether this payload asks for recurrence.
    pub fn is_recurring(&self) -> bool {
        self.repeat_enabled && self.repeat_interval_seconds.is_some()
    }
}

/// Payload of a `notification` task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPayload {
    /// The text surfaced to the user.
    pub message: String,
    /// Severity label, currently always `info` for worker completions.
    pub severity: String,
    /// The work task this notification reports on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_task_id: Option<String>,
    /// Artifacts produced by the related task.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifact_refs: Vec<String>,
    /// Metadata carried over from the work payload (e.g. `channel_id`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task_with_payload(payload: Value) -> Task {
        Task {
            task_id: "t1".into(),
            task_type: kind::WORK.into(),
            payload,
            state: TaskState::Queued,
            artifact_refs: vec![],
            claimed_by: None,
            claim_expires_at: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn state_round_trips_through_strings() {
        for state in [
            TaskState::Queued,
            TaskState::Running,
            TaskState::Done,
            TaskState::Failed,
        ] {
            assert_eq!(TaskState::parse(state.as_str()), Some(state));
        }
        assert_eq!(TaskState::parse("bogus"), None);
    }

    #[test]
    fn terminal_states() {
        assert!(TaskState::Done.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(!TaskState::Queued.is_terminal());
        assert!(!TaskState::Running.is_terminal());
    }

    #[test]
    fn message_reads_both_payload_shapes() {
        let work = task_with_payload(json!({"message": "do the thing"}));
        assert_eq!(work.message(), Some("do the thing"));

        let request = task_with_payload(json!({"user_message": "hello"}));
        assert_eq!(request.message(), Some("hello"));

        let empty = task_with_payload(json!({"message": ""}));
        assert_eq!(empty.message(), None);
    }

    #[test]
    fn lease_liveness() {
        let mut task = task_with_payload(json!({}));
        assert!(!task.has_live_lease(1_000));

        task.claimed_by = Some("main".into());
        task.claim_expires_at = Some(2_000);
        assert!(task.has_live_lease(1_000));
        assert!(!task.has_live_lease(2_000));
    }

    #[test]
    fn recurring_requires_both_fields() {
        let recurring: WorkPayload =
            serde_json::from_value(json!({"message": "m", "repeat_enabled": true, "repeat_interval_seconds": 7200}))
                .unwrap();
        assert!(recurring.is_recurring());

        let flag_only: WorkPayload =
            serde_json::from_value(json!({"message": "m", "repeat_enabled": true})).unwrap();
        assert!(!flag_only.is_recurring());
    }
}
