//! In-memory [`HistoryStore`], used for unit tests and the e2e test suite.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::model::{HistoryEvent, InstanceRow, OrchestrationStatus};

use super::store::{AppendOutcome, HistoryStore, InstanceFilter, InstanceUpdate, StoreError};

struct InstanceState {
    row: InstanceRow,
    events: Vec<(i64, HistoryEvent)>,
}

/// In-memory implementation of [`HistoryStore`].
///
/// Mirrors the semantics of the PostgreSQL-backed store exactly (idempotent
/// append, last-writer-wins state merge) so tests written against it carry
/// over to the production backend unchanged.
#[derive(Default)]
pub struct InMemoryHistoryStore {
    instances: RwLock<HashMap<String, InstanceState>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.read().len()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn create_instance(&self, row: InstanceRow) -> Result<(), StoreError> {
        let mut instances = self.instances.write();
        if instances.contains_key(&row.instance_id) {
            return Err(StoreError::Database(format!(
                "instance {} already exists",
                row.instance_id
            )));
        }
        instances.insert(
            row.instance_id.clone(),
            InstanceState {
                row,
                events: Vec::new(),
            },
        );
        Ok(())
    }

    async fn append_message(
        &self,
        instance_id: &str,
        sequence_id: i64,
        event: HistoryEvent,
    ) -> Result<AppendOutcome, StoreError> {
        let mut instances = self.instances.write();
        let state = instances
            .get_mut(instance_id)
            .ok_or_else(|| StoreError::InstanceNotFound(instance_id.to_string()))?;

        if state.events.iter().any(|(seq, _)| *seq == sequence_id) {
            return Ok(AppendOutcome::Duplicate);
        }

        state.events.push((sequence_id, event));
        state.events.sort_by_key(|(seq, _)| *seq);
        Ok(AppendOutcome::Appended)
    }

    async fn update_state(&self, instance_id: &str, update: InstanceUpdate) -> Result<(), StoreError> {
        let mut instances = self.instances.write();
        let state = instances
            .get_mut(instance_id)
            .ok_or_else(|| StoreError::InstanceNotFound(instance_id.to_string()))?;

        if let Some(status) = update.status {
            state.row.status = status;
        }
        if let Some(sub_status) = update.sub_status {
            state.row.sub_status = Some(sub_status);
        }
        if let Some(output) = update.output {
            state.row.output = Some(output);
        }
        if let Some(failure) = update.failure {
            state.row.failure = Some(failure);
        }
        state.row.last_updated_at = Utc::now();
        Ok(())
    }

    async fn read_state(&self, instance_id: &str) -> Result<Option<InstanceRow>, StoreError> {
        Ok(self.instances.read().get(instance_id).map(|s| s.row.clone()))
    }

    async fn stream_messages(&self, instance_id: &str) -> Result<Vec<(i64, HistoryEvent)>, StoreError> {
        self.instances
            .read()
            .get(instance_id)
            .map(|s| s.events.clone())
            .ok_or_else(|| StoreError::InstanceNotFound(instance_id.to_string()))
    }

    async fn purge(&self, instance_id: &str) -> Result<(), StoreError> {
        self.instances.write().remove(instance_id);
        Ok(())
    }

    async fn purge_by(&self, filter: InstanceFilter) -> Result<u64, StoreError> {
        let mut instances = self.instances.write();
        let to_remove: Vec<String> = instances
            .values()
            .filter(|s| matches_filter(&s.row, &filter))
            .map(|s| s.row.instance_id.clone())
            .collect();
        for id in &to_remove {
            instances.remove(id);
        }
        Ok(to_remove.len() as u64)
    }

    async fn list_instances(&self, filter: InstanceFilter) -> Result<Vec<InstanceRow>, StoreError> {
        Ok(self
            .instances
            .read()
            .values()
            .map(|s| &s.row)
            .filter(|row| matches_filter(row, &filter))
            .cloned()
            .collect())
    }
}

fn matches_filter(row: &InstanceRow, filter: &InstanceFilter) -> bool {
    if let Some(from) = filter.created_from {
        if row.created_at < from {
            return false;
        }
    }
    if let Some(to) = filter.created_to {
        if row.created_at > to {
            return false;
        }
    }
    if !filter.statuses.is_empty() && !filter.statuses.contains(&row.status) {
        return false;
    }
    true
}

#[allow(dead_code)]
fn assert_status_covers_all(status: OrchestrationStatus) -> OrchestrationStatus {
    status
}
