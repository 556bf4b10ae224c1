//! The history store contract.

use async_trait::async_trait;

use crate::model::{HistoryEvent, InstanceRow};

/// Errors from history store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Outcome of [`HistoryStore::append_message`]. A `Duplicate` result is not
/// an error: it is exactly the idempotency guarantee the runner relies on
/// to make turn commit safe under redelivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    Duplicate,
}

/// Last-writer-wins partial update to the state row, merged at commit.
#[derive(Debug, Clone, Default)]
pub struct InstanceUpdate {
    pub status: Option<crate::model::OrchestrationStatus>,
    pub sub_status: Option<String>,
    pub output: Option<serde_json::Value>,
    pub failure: Option<crate::model::FailureDetails>,
}

/// Filter for `purge_by` / listing queries.
#[derive(Debug, Clone, Default)]
pub struct InstanceFilter {
    pub created_from: Option<chrono::DateTime<chrono::Utc>>,
    pub created_to: Option<chrono::DateTime<chrono::Utc>>,
    pub statuses: Vec<crate::model::OrchestrationStatus>,
}

/// Per-instance append-only history log plus a single state row, with
/// idempotent append by sequence id.
///
/// Implementations must be thread-safe: the same instance may be appended
/// to by redelivered dispatch attempts running on different workers.
#[async_trait]
pub trait HistoryStore: Send + Sync + 'static {
    /// Insert the state row for a brand-new instance. Errors if one already
    /// exists for this `instance_id` (instances are created exactly once
    /// per lifetime; `ContinueAsNew` reuses the row via `update_state`).
    async fn create_instance(&self, row: InstanceRow) -> Result<(), StoreError>;

    /// Idempotent by `(instance_id, sequence_id)`: appending a row that
    /// already exists is a no-op that returns `Duplicate` rather than an
    /// error.
    async fn append_message(
        &self,
        instance_id: &str,
        sequence_id: i64,
        event: HistoryEvent,
    ) -> Result<AppendOutcome, StoreError>;

    /// Merge `update` into the state row. Each field is last-writer-wins;
    /// omitted fields are untouched.
    async fn update_state(&self, instance_id: &str, update: InstanceUpdate) -> Result<(), StoreError>;

    /// Read the current state row, if the instance exists.
    async fn read_state(&self, instance_id: &str) -> Result<Option<InstanceRow>, StoreError>;

    /// All events for this instance, ordered by `sequence_id` ascending.
    /// Restartable: calling this twice yields the same prefix as long as no
    /// new events were appended in between.
    async fn stream_messages(&self, instance_id: &str) -> Result<Vec<(i64, HistoryEvent)>, StoreError>;

    /// The next sequence id to allocate for this instance (`history.len()`
    /// when history is dense from zero, per I1).
    async fn next_sequence_id(&self, instance_id: &str) -> Result<i64, StoreError> {
        Ok(self.stream_messages(instance_id).await?.len() as i64)
    }

    /// Delete the state row and all history rows for this instance's
    /// partition. The only way an instance is destroyed.
    async fn purge(&self, instance_id: &str) -> Result<(), StoreError>;

    /// Purge every instance matching `filter`; returns the count removed.
    async fn purge_by(&self, filter: InstanceFilter) -> Result<u64, StoreError>;

    /// List instances matching `filter`, for client queries.
    async fn list_instances(&self, filter: InstanceFilter) -> Result<Vec<InstanceRow>, StoreError>;
}
