//! The history event model.
//!
//! Events are stored in the history table, one per `(instance_id,
//! sequence_id)`. They are serialized as a discriminated union so an
//! unknown variant fails to deserialize rather than silently decoding into
//! the wrong shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::instance::FailureDetails;

/// One row of an instance's append-only history.
///
/// `id` is the sequence id of the event that *scheduled* the thing this
/// event completes, where applicable (`*Completed`/`TimerFired` carry a
/// `scheduled_id` field instead, to disambiguate from their own sequence
/// id, which is assigned when the completion itself is appended).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryEvent {
    /// Turn boundary marker; its timestamp is the orchestrator's
    /// deterministic `current_utc_datetime` for the turn it opens.
    OrchestratorStarted { timestamp: DateTime<Utc> },

    /// First event of an execution. Exactly one per execution (a
    /// `ContinueAsNew` starts a fresh execution with a new one of these).
    /// Carries the orchestration type `name` so a sub-orchestration's first
    /// turn can resolve its handler without a pre-existing state row.
    ExecutionStarted {
        timestamp: DateTime<Utc>,
        name: String,
        input: serde_json::Value,
    },

    /// Terminal: the orchestrator completed, successfully or not.
    ExecutionCompleted {
        id: i64,
        timestamp: DateTime<Utc>,
        result: Option<serde_json::Value>,
        failure: Option<FailureDetails>,
    },

    /// Terminal: a client terminated the instance.
    ExecutionTerminated {
        id: i64,
        timestamp: DateTime<Utc>,
        reason: String,
    },

    /// Ends the current execution and starts a new one under the same
    /// instance id.
    ContinueAsNew {
        id: i64,
        timestamp: DateTime<Utc>,
        input: serde_json::Value,
        version: Option<String>,
        carry_over_messages: Vec<HistoryEvent>,
    },

    TaskActivityScheduled {
        id: i64,
        timestamp: DateTime<Utc>,
        name: String,
        input: serde_json::Value,
    },
    TaskActivityCompleted {
        id: i64,
        timestamp: DateTime<Utc>,
        scheduled_id: i64,
        result: Option<serde_json::Value>,
        failure: Option<FailureDetails>,
    },

    SubOrchestrationScheduled {
        id: i64,
        timestamp: DateTime<Utc>,
        name: String,
        instance_id: String,
        input: serde_json::Value,
    },
    SubOrchestrationCompleted {
        id: i64,
        timestamp: DateTime<Utc>,
        scheduled_id: i64,
        result: Option<serde_json::Value>,
        failure: Option<FailureDetails>,
    },

    TimerScheduled {
        id: i64,
        timestamp: DateTime<Utc>,
        fire_at: DateTime<Utc>,
    },
    TimerFired {
        id: i64,
        timestamp: DateTime<Utc>,
        scheduled_id: i64,
    },

    EventSent {
        id: i64,
        timestamp: DateTime<Utc>,
        target_instance_id: String,
        name: String,
        input: serde_json::Value,
    },
    EventReceived {
        id: i64,
        timestamp: DateTime<Utc>,
        name: String,
        input: serde_json::Value,
    },

    /// Extensibility escape hatch for data the model doesn't name directly.
    GenericMessage {
        id: i64,
        timestamp: DateTime<Utc>,
        name: String,
        data: serde_json::Value,
    },
}

impl HistoryEvent {
    /// Bookkeeping events are skipped during replay matching; they
    /// carry no action intent to match against.
    pub fn is_bookkeeping(&self) -> bool {
        matches!(self, Self::OrchestratorStarted { .. })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ExecutionCompleted { .. } | Self::ExecutionTerminated { .. }
        )
    }

    /// The sequence id this event correlates back to, for `*Completed` /
    /// `TimerFired` style events. `None` for events with no predecessor to
    /// match (scheduling events, bookkeeping, received events).
    pub fn scheduled_id(&self) -> Option<i64> {
        match self {
            Self::TaskActivityCompleted { scheduled_id, .. }
            | Self::SubOrchestrationCompleted { scheduled_id, .. }
            | Self::TimerFired { scheduled_id, .. } => Some(*scheduled_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ts() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn execution_started_round_trips() {
        let event = HistoryEvent::ExecutionStarted {
            timestamp: ts(),
            name: "greet".into(),
            input: json!({"name": "World"}),
        };
        let encoded = serde_json::to_string(&event).unwrap();
        assert!(encoded.contains("\"type\":\"execution_started\""));
        let decoded: HistoryEvent = serde_json::from_str(&encoded).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn every_variant_round_trips() {
        let events = vec![
            HistoryEvent::OrchestratorStarted { timestamp: ts() },
            HistoryEvent::ExecutionCompleted {
                id: 1,
                timestamp: ts(),
                result: Some(json!("ok")),
                failure: None,
            },
            HistoryEvent::ExecutionTerminated {
                id: 1,
                timestamp: ts(),
                reason: "stop".into(),
            },
            HistoryEvent::ContinueAsNew {
                id: 1,
                timestamp: ts(),
                input: json!({}),
                version: Some("2".into()),
                carry_over_messages: vec![],
            },
            HistoryEvent::TaskActivityScheduled {
                id: 1,
                timestamp: ts(),
                name: "say_hello".into(),
                input: json!("World"),
            },
            HistoryEvent::TaskActivityCompleted {
                id: 2,
                timestamp: ts(),
                scheduled_id: 1,
                result: Some(json!("Hello, World")),
                failure: None,
            },
            HistoryEvent::SubOrchestrationScheduled {
                id: 1,
                timestamp: ts(),
                name: "child".into(),
                instance_id: "child-1".into(),
                input: json!({}),
            },
            HistoryEvent::SubOrchestrationCompleted {
                id: 2,
                timestamp: ts(),
                scheduled_id: 1,
                result: None,
                failure: Some(FailureDetails::new("Boom", "failed")),
            },
            HistoryEvent::TimerScheduled {
                id: 1,
                timestamp: ts(),
                fire_at: ts(),
            },
            HistoryEvent::TimerFired {
                id: 2,
                timestamp: ts(),
                scheduled_id: 1,
            },
            HistoryEvent::EventSent {
                id: 1,
                timestamp: ts(),
                target_instance_id: "other".into(),
                name: "Go".into(),
                input: json!(42),
            },
            HistoryEvent::EventReceived {
                id: 1,
                timestamp: ts(),
                name: "Go".into(),
                input: json!(42),
            },
            HistoryEvent::GenericMessage {
                id: 1,
                timestamp: ts(),
                name: "custom".into(),
                data: json!({"k": "v"}),
            },
        ];

        for event in events {
            let encoded = serde_json::to_string(&event).unwrap();
            let decoded: HistoryEvent = serde_json::from_str(&encoded).unwrap();
            assert_eq!(event, decoded);
        }
    }

    #[test]
    fn unknown_discriminator_fails_closed() {
        let bad = json!({"type": "not_a_real_event", "id": 1});
        let result: Result<HistoryEvent, _> = serde_json::from_value(bad);
        assert!(result.is_err());
    }

    #[test]
    fn bookkeeping_is_skipped_from_matching() {
        assert!(HistoryEvent::OrchestratorStarted { timestamp: ts() }.is_bookkeeping());
        assert!(!HistoryEvent::TimerFired {
            id: 1,
            timestamp: ts(),
            scheduled_id: 0
        }
        .is_bookkeeping());
    }

    #[test]
    fn scheduled_id_correlation() {
        let event = HistoryEvent::TaskActivityCompleted {
            id: 5,
            timestamp: ts(),
            scheduled_id: 2,
            result: None,
            failure: None,
        };
        assert_eq!(event.scheduled_id(), Some(2));
    }
}
