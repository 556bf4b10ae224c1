//! Instance status and the state row persisted per orchestration instance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of an orchestration instance.
///
/// `Pending` transitions to `Running` on the first turn. `Completed`,
/// `Failed`, and `Terminated` are terminal: no further history may be
/// appended for that execution except a `ContinueAsNew`-initiated one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationStatus {
    Pending,
    Running,
    Suspended,
    Completed,
    Failed,
    Terminated,
}

impl OrchestrationStatus {
    /// Terminal statuses accept no further history appends.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Terminated
        )
    }
}

impl std::fmt::Display for OrchestrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Terminated => "terminated",
        };
        write!(f, "{s}")
    }
}

/// A user-code or infrastructure failure, recursively nestable so a wrapped
/// cause can travel alongside the wrapping error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureDetails {
    /// Opaque error classifier (e.g. `"NonDeterminism"`, `"TaskMissing"`, or
    /// a user-supplied code).
    pub error_type: String,

    /// Human-readable message.
    pub message: String,

    /// Optional stack trace, carried through but never interpreted.
    pub stack_trace: Option<String>,

    /// The failure this one wraps, if any.
    pub inner: Option<Box<FailureDetails>>,
}

impl FailureDetails {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
            stack_trace: None,
            inner: None,
        }
    }

    pub fn with_stack_trace(mut self, trace: impl Into<String>) -> Self {
        self.stack_trace = Some(trace.into());
        self
    }

    pub fn wrapping(mut self, inner: FailureDetails) -> Self {
        self.inner = Some(Box::new(inner));
        self
    }

    /// Error type used for replay mismatches.
    pub const NON_DETERMINISM: &'static str = "NonDeterminism";

    /// Error type used when an orchestrator/activity name has no registered
    /// handler; the retry engine treats this as fatal.
    pub const TASK_MISSING: &'static str = "TaskMissing";

    pub fn non_determinism(message: impl Into<String>) -> Self {
        Self::new(Self::NON_DETERMINISM, message)
    }

    pub fn task_missing(name: &str) -> Self {
        Self::new(Self::TASK_MISSING, format!("no handler registered for '{name}'"))
    }

    pub fn is_task_missing(&self) -> bool {
        self.error_type == Self::TASK_MISSING
    }
}

impl std::fmt::Display for FailureDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_type, self.message)
    }
}

impl std::error::Error for FailureDetails {}

/// The single state row an instance owns, keyed by `instance_id`.
///
/// History and this row are separate artifacts: history is
/// append-only, this row is merge-updated at every turn commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceRow {
    pub instance_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub status: OrchestrationStatus,
    pub sub_status: Option<String>,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub failure: Option<FailureDetails>,
}

impl InstanceRow {
    pub fn new(instance_id: impl Into<String>, name: impl Into<String>, input: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            instance_id: instance_id.into(),
            name: name.into(),
            created_at: now,
            last_updated_at: now,
            status: OrchestrationStatus::Pending,
            sub_status: None,
            input,
            output: None,
            failure: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(OrchestrationStatus::Completed.is_terminal());
        assert!(OrchestrationStatus::Failed.is_terminal());
        assert!(OrchestrationStatus::Terminated.is_terminal());
        assert!(!OrchestrationStatus::Running.is_terminal());
        assert!(!OrchestrationStatus::Suspended.is_terminal());
        assert!(!OrchestrationStatus::Pending.is_terminal());
    }

    #[test]
    fn failure_round_trips() {
        let f = FailureDetails::new("Boom", "it broke").wrapping(FailureDetails::new("Cause", "root cause"));
        let json = serde_json::to_string(&f).unwrap();
        let parsed: FailureDetails = serde_json::from_str(&json).unwrap();
        assert_eq!(f, parsed);
    }

    #[test]
    fn task_missing_classifier() {
        let f = FailureDetails::task_missing("ship_order");
        assert!(f.is_task_missing());
    }
}
