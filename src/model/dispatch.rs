//! Work-dispatch envelope: the wire shape that moves between the history
//! store / queue transport and the dispatcher.

use serde::{Deserialize, Serialize};

use super::event::HistoryEvent;

/// Which queue / runner kind a dispatch envelope belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemKind {
    Orchestration,
    Activity,
}

/// Identifies the parent instance of a sub-orchestration, by id only
///.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParentInstance {
    pub id: String,
    pub name: String,
    pub queue: Option<String>,
}

/// `{ Id, Message, Parent? }` on the wire.
///
/// Transport-populated fields (`message_id`, `pop_receipt`, `dequeue_count`)
/// are attached by the concrete [`crate::queue::WorkItemSource`] once the
/// envelope has been received off a real queue; they are not part of the
/// logical payload and are therefore kept out of this serialized shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkDispatch {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Message")]
    pub message: HistoryEvent,
    #[serde(rename = "Parent")]
    pub parent: Option<ParentInstance>,
}

impl WorkDispatch {
    pub fn new(instance_id: impl Into<String>, message: HistoryEvent) -> Self {
        Self {
            id: instance_id.into(),
            message,
            parent: None,
        }
    }

    pub fn with_parent(mut self, parent: ParentInstance) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn kind(&self) -> WorkItemKind {
        match &self.message {
            HistoryEvent::TaskActivityScheduled { .. } => WorkItemKind::Activity,
            _ => WorkItemKind::Orchestration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn dispatch_round_trips_with_wire_field_names() {
        let dispatch = WorkDispatch::new(
            "inst-1",
            HistoryEvent::TaskActivityScheduled {
                id: 1,
                timestamp: Utc::now(),
                name: "say_hello".into(),
                input: json!("World"),
            },
        );
        let encoded = serde_json::to_string(&dispatch).unwrap();
        assert!(encoded.contains("\"Id\":\"inst-1\""));
        assert!(encoded.contains("\"Message\""));
        let decoded: WorkDispatch = serde_json::from_str(&encoded).unwrap();
        assert_eq!(dispatch, decoded);
    }

    #[test]
    fn activity_scheduled_routes_to_activity_kind() {
        let dispatch = WorkDispatch::new(
            "inst-1",
            HistoryEvent::TaskActivityScheduled {
                id: 1,
                timestamp: Utc::now(),
                name: "say_hello".into(),
                input: json!("World"),
            },
        );
        assert_eq!(dispatch.kind(), WorkItemKind::Activity);
    }
}
