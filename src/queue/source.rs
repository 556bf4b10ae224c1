//! Work-item source contract: the boundary between a concrete
//! queue transport and the dispatcher.

use std::time::Duration;

use async_trait::async_trait;

use crate::model::{WorkDispatch, WorkItemKind};

/// Cap on items returned by a single [`WorkItemSource::receive_batch`] call.
pub const BATCH_CAP: usize = 32;

/// A message redelivered more than this many times is presumed poisoned.
pub const POISON_THRESHOLD: u32 = 30;

/// Visibility delay applied when abandoning a poisoned message, capping how
/// often it comes back around for another (doomed) attempt.
pub const MAX_POISON_VISIBILITY_DELAY: Duration = Duration::from_secs(600);

/// Errors surfaced by a [`WorkItemSource`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("source is closed")]
    Closed,

    #[error("item not found or lease expired")]
    LeaseExpired,
}

/// One dispatch envelope received off a queue, with the transport metadata
/// needed to complete, abandon, or renew its lease.
#[derive(Debug, Clone)]
pub struct ReceivedItem {
    pub dispatch: WorkDispatch,
    pub message_id: String,
    pub pop_receipt: String,
    pub dequeue_count: u32,
}

impl ReceivedItem {
    /// Whether this item has been redelivered enough times to be treated as
    /// poisoned.
    pub fn is_poisoned(&self) -> bool {
        self.dequeue_count > POISON_THRESHOLD
    }
}

/// Transport-agnostic source of dispatch envelopes for one [`WorkItemKind`].
///
/// Visibility renewal is exposed as a capability on the item's lease
/// (`try_renew_lock`), not as a distinct handle type: a lease is a
/// capability, not an object identity.
#[async_trait]
pub trait WorkItemSource: Send + Sync + 'static {
    fn kind(&self) -> WorkItemKind;

    /// Receive up to `max_items` (capped at [`BATCH_CAP`]) available items.
    /// Blocks until at least one item is available or the source closes.
    async fn receive_batch(&self, max_items: usize) -> Result<Vec<ReceivedItem>, SourceError>;

    /// Acknowledge successful processing; removes the item permanently.
    async fn complete(&self, item: &ReceivedItem) -> Result<(), SourceError>;

    /// Return the item to the queue, invisible for `visibility_delay`.
    ///
    /// Callers implementing the poison-message policy should clamp
    /// `visibility_delay` to [`MAX_POISON_VISIBILITY_DELAY`] once
    /// [`ReceivedItem::is_poisoned`] is true.
    async fn abandon(&self, item: &ReceivedItem, visibility_delay: Duration) -> Result<(), SourceError>;

    /// Extend the invisibility window of an in-flight item without
    /// completing or abandoning it, for work that outlives one lease period.
    async fn try_renew_lock(&self, item: &ReceivedItem, extension: Duration) -> Result<(), SourceError>;
}

/// The enqueue side of a queue transport: posting a fresh dispatch
/// envelope, optionally not visible for `delay` (used for durable timers).
#[async_trait]
pub trait QueueSink: Send + Sync + 'static {
    async fn enqueue(&self, dispatch: WorkDispatch, delay: Duration) -> Result<(), SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HistoryEvent;
    use chrono::Utc;
    use serde_json::json;

    fn dispatch() -> WorkDispatch {
        WorkDispatch::new(
            "inst-1",
            HistoryEvent::TaskActivityScheduled {
                id: 1,
                timestamp: Utc::now(),
                name: "say_hello".into(),
                input: json!("World"),
            },
        )
    }

    #[test]
    fn poisoned_past_threshold() {
        let item = ReceivedItem {
            dispatch: dispatch(),
            message_id: "m1".into(),
            pop_receipt: "r1".into(),
            dequeue_count: 31,
        };
        assert!(item.is_poisoned());

        let item = ReceivedItem { dequeue_count: 30, ..item };
        assert!(!item.is_poisoned());
    }
}
