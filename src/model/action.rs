//! Actions an orchestration turn can emit.
//!
//! An action is a proposed, not-yet-persisted emission: the runner turns
//! each one into a history append plus, for dispatch actions, a queue
//! enqueue at turn commit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::instance::{FailureDetails, OrchestrationStatus};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestrationAction {
    /// Matches a prior `TaskActivityScheduled` with the same `(id, name)`.
    ScheduleActivity {
        id: i64,
        name: String,
        input: serde_json::Value,
    },

    /// Matches a prior `SubOrchestrationScheduled` with the same `(id, name)`.
    ScheduleSubOrchestration {
        id: i64,
        name: String,
        instance_id: String,
        input: serde_json::Value,
    },

    /// Matches a prior `TimerScheduled` with the same `(id, fire_at)`.
    CreateTimer { id: i64, fire_at: DateTime<Utc> },

    /// Fire-and-forget; matches a prior `EventSent` with the same `(id,
    /// target, name)`.
    SendEvent {
        id: i64,
        target_instance_id: String,
        name: String,
        input: serde_json::Value,
    },

    /// Synthetic terminal action. Folds `Completed`/`Failed`/`Terminated`/
    /// `ContinueAsNew` into one action distinguished by `status`, since all
    /// four end the turn the same way: update state, possibly start a
    /// fresh execution.
    CompleteOrchestration {
        status: OrchestrationStatus,
        result: Option<serde_json::Value>,
        failure: Option<FailureDetails>,
        /// Present only when `status == ContinueAsNew` is modeled as
        /// `Running` with a carry-over payload; see
        /// [`OrchestrationAction::continue_as_new`].
        carry_over: Option<ContinueAsNewPayload>,
    },

    /// Merged into the state row at commit; does not itself append a
    /// distinct history event (it rides along with whatever the turn
    /// otherwise emits).
    SetSubStatus { value: Option<String> },
}

/// Payload for a `ContinueAsNew` terminal action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContinueAsNewPayload {
    pub input: serde_json::Value,
    pub version: Option<String>,
    pub carry_over_messages: Vec<crate::model::HistoryEvent>,
}

impl OrchestrationAction {
    pub fn complete(result: serde_json::Value) -> Self {
        Self::CompleteOrchestration {
            status: OrchestrationStatus::Completed,
            result: Some(result),
            failure: None,
            carry_over: None,
        }
    }

    pub fn fail(failure: FailureDetails) -> Self {
        Self::CompleteOrchestration {
            status: OrchestrationStatus::Failed,
            result: None,
            failure: Some(failure),
            carry_over: None,
        }
    }

    pub fn terminate(reason: impl Into<String>) -> Self {
        Self::CompleteOrchestration {
            status: OrchestrationStatus::Terminated,
            result: Some(serde_json::Value::String(reason.into())),
            failure: None,
            carry_over: None,
        }
    }

    pub fn continue_as_new(payload: ContinueAsNewPayload) -> Self {
        Self::CompleteOrchestration {
            status: OrchestrationStatus::Running,
            result: None,
            failure: None,
            carry_over: Some(payload),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::CompleteOrchestration { carry_over: None, .. })
    }

    pub fn is_continue_as_new(&self) -> bool {
        matches!(self, Self::CompleteOrchestration { carry_over: Some(_), .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn schedule_activity_round_trips() {
        let action = OrchestrationAction::ScheduleActivity {
            id: 1,
            name: "say_hello".into(),
            input: json!("World"),
        };
        let encoded = serde_json::to_string(&action).unwrap();
        assert!(encoded.contains("\"type\":\"schedule_activity\""));
        let decoded: OrchestrationAction = serde_json::from_str(&encoded).unwrap();
        assert_eq!(action, decoded);
    }

    #[test]
    fn complete_is_terminal_continue_as_new_is_not() {
        assert!(OrchestrationAction::complete(json!("done")).is_terminal());
        let cont = OrchestrationAction::continue_as_new(ContinueAsNewPayload {
            input: json!({}),
            version: None,
            carry_over_messages: vec![],
        });
        assert!(!cont.is_terminal());
        assert!(cont.is_continue_as_new());
    }
}
