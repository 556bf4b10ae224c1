//! Dispatcher: pulls dispatch envelopes off the orchestration
//! and activity queues, drives a turn/attempt, and commits the result.
//!
//! One semaphore per work-item kind bounds concurrency, a `watch` channel
//! drives graceful shutdown, and a background poll loop per source feeds
//! the bounded pool. Orchestration turns and activity attempts run through
//! two independently configured sources since they have different commit
//! protocols.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

use crate::activity::{ActivityOutcome, ActivityRegistry, ActivityRunner};
use crate::history::{AppendOutcome, HistoryStore, StoreError};
use crate::model::{HistoryEvent, OrchestrationStatus, WorkDispatch, WorkItemKind};
use crate::orchestration::{OrchestrationRegistry, OrchestrationWorkItem, OrchestratorRunner, ScheduledDispatch, TurnDecision};
use crate::queue::{QueueSink, ReceivedItem, SourceError, WorkItemSource, MAX_POISON_VISIBILITY_DELAY, POISON_THRESHOLD};

/// Dispatcher configuration: per-kind concurrency and the shutdown deadline,
/// split across the two kinds this dispatcher fans in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    pub max_concurrent_orchestration_turns: usize,
    pub max_concurrent_activities: usize,

    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,

    /// Retry delay applied when a transient `StoreError`/`SourceError`
    /// interrupts a commit, rather than on the user-level retry path.
    #[serde(with = "duration_millis")]
    pub infra_retry_delay: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent_orchestration_turns: 50,
            max_concurrent_activities: 20,
            shutdown_timeout: Duration::from_secs(30),
            infra_retry_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatcherError {
    #[error("dispatcher already running")]
    AlreadyRunning,

    #[error("graceful shutdown timed out")]
    ShutdownTimeout,
}

/// Where a commit routes a [`ScheduledDispatch`]: the orchestration queue for
/// timers/events/sub-orchestration starts, the activity queue for scheduled
/// activities.
struct Sinks {
    orchestration: Arc<dyn QueueSink>,
    activity: Arc<dyn QueueSink>,
}

impl Sinks {
    async fn route(&self, scheduled: ScheduledDispatch) -> Result<(), SourceError> {
        let sink = match scheduled.dispatch.kind() {
            WorkItemKind::Orchestration => &self.orchestration,
            WorkItemKind::Activity => &self.activity,
        };
        sink.enqueue(scheduled.dispatch, scheduled.delay).await
    }
}

/// Ties a [`HistoryStore`] and the two registries to a pair of queue
/// transports, running bounded-concurrency turn/activity loops until
/// [`Dispatcher::shutdown`] drains them.
pub struct Dispatcher<S: HistoryStore> {
    store: Arc<S>,
    orchestration_runner: Arc<OrchestratorRunner>,
    activity_runner: Arc<ActivityRunner>,
    orchestration_source: Arc<dyn WorkItemSource>,
    activity_source: Arc<dyn WorkItemSource>,
    sinks: Arc<Sinks>,
    config: DispatcherConfig,
    orchestration_permits: Arc<Semaphore>,
    activity_permits: Arc<Semaphore>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    running: AtomicBool,
    orchestration_loop: std::sync::Mutex<Option<JoinHandle<()>>>,
    activity_loop: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<S: HistoryStore> Dispatcher<S> {
    pub fn new(
        store: Arc<S>,
        orchestration_registry: Arc<OrchestrationRegistry>,
        activity_registry: Arc<ActivityRegistry>,
        orchestration_source: Arc<dyn WorkItemSource>,
        orchestration_sink: Arc<dyn QueueSink>,
        activity_source: Arc<dyn WorkItemSource>,
        activity_sink: Arc<dyn QueueSink>,
        config: DispatcherConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            store,
            orchestration_runner: Arc::new(OrchestratorRunner::new(orchestration_registry)),
            activity_runner: Arc::new(ActivityRunner::new(activity_registry)),
            orchestration_source,
            activity_source,
            sinks: Arc::new(Sinks { orchestration: orchestration_sink, activity: activity_sink }),
            orchestration_permits: Arc::new(Semaphore::new(config.max_concurrent_orchestration_turns)),
            activity_permits: Arc::new(Semaphore::new(config.max_concurrent_activities)),
            config,
            shutdown_tx,
            shutdown_rx,
            running: AtomicBool::new(false),
            orchestration_loop: std::sync::Mutex::new(None),
            activity_loop: std::sync::Mutex::new(None),
        }
    }

    pub fn start(self: &Arc<Self>) -> Result<(), DispatcherError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(DispatcherError::AlreadyRunning);
        }

        *self.orchestration_loop.lock().unwrap() = Some(tokio::spawn(Arc::clone(self).run_orchestration_loop()));
        *self.activity_loop.lock().unwrap() = Some(tokio::spawn(Arc::clone(self).run_activity_loop()));
        Ok(())
    }

    /// Stop accepting new work and wait for in-flight turns/activities to
    /// release their permits, up to `shutdown_timeout`.
    pub async fn shutdown(&self) -> Result<(), DispatcherError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let _ = self.shutdown_tx.send(true);

        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
        let total_permits = self.config.max_concurrent_orchestration_turns + self.config.max_concurrent_activities;
        loop {
            let available = self.orchestration_permits.available_permits() + self.activity_permits.available_permits();
            if available == total_permits {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!("dispatcher shutdown timed out with work still in flight");
                return Err(DispatcherError::ShutdownTimeout);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        for handle in [self.orchestration_loop.lock().unwrap().take(), self.activity_loop.lock().unwrap().take()] {
            if let Some(handle) = handle {
                handle.abort();
            }
        }
        Ok(())
    }

    async fn run_orchestration_loop(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_rx.clone();
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let batch = tokio::select! {
                result = self.orchestration_source.receive_batch(32) => result,
                _ = shutdown_rx.changed() => break,
            };

            let items = match batch {
                Ok(items) => items,
                Err(SourceError::Closed) => break,
                Err(err) => {
                    error!(%err, "orchestration source receive failed");
                    tokio::time::sleep(self.config.infra_retry_delay).await;
                    continue;
                }
            };

            for item in items {
                let permit = match Arc::clone(&self.orchestration_permits).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let dispatcher = Arc::clone(&self);
                tokio::spawn(async move {
                    dispatcher.handle_orchestration_item(item).await;
                    drop(permit);
                });
            }
        }
        debug!("orchestration dispatch loop exited");
    }

    async fn run_activity_loop(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_rx.clone();
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let batch = tokio::select! {
                result = self.activity_source.receive_batch(32) => result,
                _ = shutdown_rx.changed() => break,
            };

            let items = match batch {
                Ok(items) => items,
                Err(SourceError::Closed) => break,
                Err(err) => {
                    error!(%err, "activity source receive failed");
                    tokio::time::sleep(self.config.infra_retry_delay).await;
                    continue;
                }
            };

            for item in items {
                let permit = match Arc::clone(&self.activity_permits).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let dispatcher = Arc::clone(&self);
                tokio::spawn(async move {
                    dispatcher.handle_activity_item(item).await;
                    drop(permit);
                });
            }
        }
        debug!("activity dispatch loop exited");
    }

    /// One orchestration turn's full lifecycle: load this execution's past
    /// history, run the turn, commit it, and — if it ended in
    /// `continue_as_new` — loop straight into the next execution's first
    /// turn without a queue round-trip, since the carry-over input and
    /// events are already in hand.
    #[instrument(skip(self, item), fields(instance_id = %item.dispatch.id))]
    async fn handle_orchestration_item(&self, item: ReceivedItem) {
        let instance_id = item.dispatch.id.clone();
        // The very first turn's trigger is the freshly-dequeued, not-yet-
        // persisted dispatch. A `continue_as_new` turn instead persists its
        // next execution's `ExecutionStarted` (and carry-overs) directly as
        // part of its own commit, so the following iteration has nothing new
        // to add — everything it needs is already in `past`.
        let mut new_events = vec![item.dispatch.message.clone()];

        match self.store.read_state(&instance_id).await {
            Ok(Some(row)) if row.status == OrchestrationStatus::Suspended => {
                // Leave the trigger untouched and redeliver later instead of
                // running a turn: a suspended instance stops consuming work
                // items until `resume` flips its status back.
                self.abandon_with_backoff(&self.orchestration_source, &item).await;
                return;
            }
            Ok(_) => {}
            Err(err) => {
                error!(%err, "failed to check instance status before dispatching turn");
                self.abandon_with_backoff(&self.orchestration_source, &item).await;
                return;
            }
        }

        loop {
            let name = match self.resolve_orchestration_name(&instance_id, new_events.first()).await {
                Ok(name) => name,
                Err(err) => {
                    error!(%err, "failed to resolve orchestration name");
                    self.abandon_with_backoff(&self.orchestration_source, &item).await;
                    return;
                }
            };

            let past = match self.load_current_execution_history(&instance_id).await {
                Ok(past) => past,
                Err(err) => {
                    error!(%err, "failed to load instance history");
                    self.abandon_with_backoff(&self.orchestration_source, &item).await;
                    return;
                }
            };

            let work_item = OrchestrationWorkItem {
                instance_id: instance_id.clone(),
                name,
                parent: item.dispatch.parent.clone(),
                past,
                new: new_events,
            };

            let decision = self.orchestration_runner.execute_turn(work_item).await;

            match self.commit_turn(&instance_id, decision).await {
                Ok(true) => {
                    new_events = Vec::new();
                    continue;
                }
                Ok(false) => break,
                Err(err) => {
                    error!(%err, "failed to commit orchestration turn");
                    self.abandon_with_backoff(&self.orchestration_source, &item).await;
                    return;
                }
            }
        }

        if let Err(err) = self.orchestration_source.complete(&item).await {
            warn!(%err, "failed to ack orchestration dispatch after commit");
        }
    }

    /// First turn of a brand-new execution carries its own orchestration
    /// name on `ExecutionStarted`; every other trigger belongs to an
    /// existing instance whose name is already on the state row.
    async fn resolve_orchestration_name(&self, instance_id: &str, trigger: Option<&HistoryEvent>) -> Result<String, StoreError> {
        if let Some(HistoryEvent::ExecutionStarted { name, .. }) = trigger {
            return Ok(name.clone());
        }
        let row = self.store.read_state(instance_id).await?.ok_or_else(|| StoreError::InstanceNotFound(instance_id.to_string()))?;
        Ok(row.name)
    }

    /// History from the most recent `ExecutionStarted` onward: a
    /// `ContinueAsNew` starts a fresh execution, and earlier executions'
    /// scheduled/completed pairs must not leak into this one's replay
    /// matching.
    async fn load_current_execution_history(&self, instance_id: &str) -> Result<Vec<HistoryEvent>, StoreError> {
        let stream = self.store.stream_messages(instance_id).await?;
        let last_start = stream.iter().rposition(|(_, event)| matches!(event, HistoryEvent::ExecutionStarted { .. }));
        let events = match last_start {
            Some(idx) => stream[idx..].iter().map(|(_, event)| event.clone()).collect(),
            None => Vec::new(),
        };
        Ok(events)
    }

    /// The four-step commit: append events, merge state, enqueue
    /// dispatches, then the caller deletes the triggering message. Returns
    /// `true` when the turn ended in `continue_as_new`: the next execution's
    /// `ExecutionStarted` and carry-over events are persisted here too, so
    /// the caller's next loop iteration has nothing new left to add.
    async fn commit_turn(&self, instance_id: &str, decision: TurnDecision) -> Result<bool, StoreError> {
        let mut sequence_id = self.store.next_sequence_id(instance_id).await?;
        for event in decision.events_to_append {
            match self.store.append_message(instance_id, sequence_id, event).await? {
                AppendOutcome::Appended | AppendOutcome::Duplicate => {}
            }
            sequence_id += 1;
        }

        self.store.update_state(instance_id, decision.state_update).await?;

        for scheduled in decision.dispatches {
            if let Err(err) = self.sinks.route(scheduled).await {
                warn!(%err, "failed to enqueue a turn's dispatch; it will be missing until reprocessed");
            }
        }

        let Some(payload) = decision.continue_as_new else {
            return Ok(false);
        };

        let name = self
            .store
            .read_state(instance_id)
            .await?
            .ok_or_else(|| StoreError::InstanceNotFound(instance_id.to_string()))?
            .name;

        let start = HistoryEvent::ExecutionStarted { timestamp: chrono::Utc::now(), name, input: payload.input };
        self.store.append_message(instance_id, sequence_id, start).await?;
        sequence_id += 1;
        for carried in payload.carry_over_messages {
            self.store.append_message(instance_id, sequence_id, carried).await?;
            sequence_id += 1;
        }

        Ok(true)
    }

    #[instrument(skip(self, item), fields(instance_id = %item.dispatch.id))]
    async fn handle_activity_item(&self, item: ReceivedItem) {
        let HistoryEvent::TaskActivityScheduled { id: scheduled_id, name, input, .. } = item.dispatch.message.clone() else {
            warn!("activity source delivered a non-activity dispatch; abandoning");
            self.abandon_with_backoff(&self.activity_source, &item).await;
            return;
        };

        let outcome = self
            .activity_runner
            .execute(&item.dispatch.id, scheduled_id, &name, input, item.dequeue_count, POISON_THRESHOLD)
            .await;

        match outcome {
            ActivityOutcome::Completed(event) => {
                let dispatch = WorkDispatch::new(item.dispatch.id.clone(), event);
                if let Err(err) = self.sinks.orchestration.enqueue(dispatch, Duration::ZERO).await {
                    error!(%err, "failed to enqueue activity completion; abandoning for redelivery");
                    self.abandon_with_backoff(&self.activity_source, &item).await;
                    return;
                }
                if let Err(err) = self.activity_source.complete(&item).await {
                    warn!(%err, "failed to ack activity dispatch after completion enqueued");
                }
            }
            ActivityOutcome::Abort => {
                self.abandon_with_backoff(&self.activity_source, &item).await;
            }
        }
    }

    async fn abandon_with_backoff(&self, source: &Arc<dyn WorkItemSource>, item: &ReceivedItem) {
        let delay = if item.is_poisoned() { MAX_POISON_VISIBILITY_DELAY } else { self.config.infra_retry_delay };
        if let Err(err) = source.abandon(item, delay).await {
            warn!(%err, "failed to abandon work item");
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
