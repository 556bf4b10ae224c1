//! Client API: the host-process entry point for starting,
//! signaling, and querying orchestration instances.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::instrument;
use uuid::Uuid;

use crate::history::{HistoryStore, InstanceFilter, InstanceUpdate, StoreError};
use crate::model::{HistoryEvent, InstanceRow, OrchestrationStatus, WorkDispatch};
use crate::queue::{QueueSink, SourceError};

/// Options for [`Client::schedule`].
#[derive(Debug, Clone, Default)]
pub struct ScheduleOptions {
    /// Use this instance id instead of generating one.
    pub instance_id: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] SourceError),

    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    #[error("timed out waiting for instance {0}")]
    WaitTimedOut(String),
}

/// Poll cadence for `wait_for_start`/`wait_for_completion`.
const WAIT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// The primitives a host process uses to drive orchestration instances. Not
/// itself part of a turn: every method here talks straight to the store and
/// the orchestration queue, same as any other caller.
pub struct Client<S: HistoryStore> {
    store: Arc<S>,
    orchestration_sink: Arc<dyn QueueSink>,
}

impl<S: HistoryStore> Client<S> {
    pub fn new(store: Arc<S>, orchestration_sink: Arc<dyn QueueSink>) -> Self {
        Self { store, orchestration_sink }
    }

    /// Start a new orchestration instance, returning its id.
    #[instrument(skip(self, input))]
    pub async fn schedule(
        &self,
        name: &str,
        input: serde_json::Value,
        options: ScheduleOptions,
    ) -> Result<String, ClientError> {
        let instance_id = options.instance_id.unwrap_or_else(|| Uuid::now_v7().to_string());
        self.store
            .create_instance(InstanceRow::new(instance_id.clone(), name, input.clone()))
            .await?;
        self.orchestration_sink
            .enqueue(
                WorkDispatch::new(
                    instance_id.clone(),
                    HistoryEvent::ExecutionStarted { timestamp: Utc::now(), name: name.to_string(), input },
                ),
                Duration::ZERO,
            )
            .await?;
        Ok(instance_id)
    }

    /// Fire-and-forget an external event at a running instance.
    pub async fn raise_event(&self, instance_id: &str, name: &str, payload: Option<serde_json::Value>) -> Result<(), ClientError> {
        self.orchestration_sink
            .enqueue(
                WorkDispatch::new(
                    instance_id,
                    HistoryEvent::EventReceived {
                        id: 0,
                        timestamp: Utc::now(),
                        name: name.to_string(),
                        input: payload.unwrap_or(serde_json::Value::Null),
                    },
                ),
                Duration::ZERO,
            )
            .await?;
        Ok(())
    }

    /// Force an instance to `Terminated`, skipping any further turns.
    pub async fn terminate(&self, instance_id: &str, output: Option<serde_json::Value>) -> Result<(), ClientError> {
        self.store
            .update_state(
                instance_id,
                InstanceUpdate {
                    status: Some(OrchestrationStatus::Terminated),
                    output,
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    /// Suspend an instance: the dispatcher stops delivering its work items
    /// until [`Self::resume`]. Implemented as a state-row flag rather than
    /// pausing the queue itself, since other instances share the same
    /// transport.
    pub async fn suspend(&self, instance_id: &str, reason: Option<String>) -> Result<(), ClientError> {
        self.store
            .update_state(
                instance_id,
                InstanceUpdate { status: Some(OrchestrationStatus::Suspended), sub_status: reason, ..Default::default() },
            )
            .await?;
        Ok(())
    }

    pub async fn resume(&self, instance_id: &str, reason: Option<String>) -> Result<(), ClientError> {
        self.store
            .update_state(
                instance_id,
                InstanceUpdate { status: Some(OrchestrationStatus::Running), sub_status: reason, ..Default::default() },
            )
            .await?;
        Ok(())
    }

    /// Permanently delete an instance's state and history.
    pub async fn purge(&self, instance_id: &str) -> Result<(), ClientError> {
        self.store.purge(instance_id).await?;
        Ok(())
    }

    /// Purge every instance matching `filter`; returns the count removed.
    pub async fn purge_by(&self, filter: InstanceFilter) -> Result<u64, ClientError> {
        Ok(self.store.purge_by(filter).await?)
    }

    /// Fetch the current state row. `include_payloads` trims `input`,
    /// `output`, and `failure` when `false`, for callers that only need
    /// status.
    pub async fn get(&self, instance_id: &str, include_payloads: bool) -> Result<InstanceRow, ClientError> {
        let mut row = self
            .store
            .read_state(instance_id)
            .await?
            .ok_or_else(|| ClientError::InstanceNotFound(instance_id.to_string()))?;
        if !include_payloads {
            row.input = serde_json::Value::Null;
            row.output = None;
            row.failure = None;
        }
        Ok(row)
    }

    /// Block until the instance has left `Pending` (its first turn has run).
    /// `timeout`, when `Some`, bounds how long this polls before returning
    /// `ClientError::WaitTimedOut`; `None` polls indefinitely.
    pub async fn wait_for_start(&self, instance_id: &str, timeout: Option<Duration>) -> Result<InstanceRow, ClientError> {
        self.poll_until(instance_id, timeout, |row| row.status != OrchestrationStatus::Pending).await
    }

    /// Block until the instance reaches a terminal status. `timeout`, when
    /// `Some`, bounds how long this polls before returning
    /// `ClientError::WaitTimedOut`; `None` polls indefinitely.
    pub async fn wait_for_completion(&self, instance_id: &str, timeout: Option<Duration>) -> Result<InstanceRow, ClientError> {
        self.poll_until(instance_id, timeout, |row| row.status.is_terminal()).await
    }

    async fn poll_until(
        &self,
        instance_id: &str,
        timeout: Option<Duration>,
        done: impl Fn(&InstanceRow) -> bool,
    ) -> Result<InstanceRow, ClientError> {
        let deadline = timeout.map(|d| tokio::time::Instant::now() + d);
        loop {
            let row = self
                .store
                .read_state(instance_id)
                .await?
                .ok_or_else(|| ClientError::InstanceNotFound(instance_id.to_string()))?;
            if done(&row) {
                return Ok(row);
            }
            if let Some(deadline) = deadline {
                if tokio::time::Instant::now() >= deadline {
                    return Err(ClientError::WaitTimedOut(instance_id.to_string()));
                }
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }
}
