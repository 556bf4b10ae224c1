//! Orchestration context API: the only way user code observes
//! time, identity, or the outcome of scheduled work. Every await point
//! resolves synchronously against history during replay, or suspends for
//! the rest of the turn once live history is exhausted.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::ids::DeterministicSource;
use crate::model::{ContinueAsNewPayload, FailureDetails, HistoryEvent, OrchestrationAction};

use super::error::OrchestrationError;

/// The result a scheduled intent resolves to, once known.
#[derive(Debug, Clone)]
pub(crate) enum Outcome {
    Value(Value),
    Failure(FailureDetails),
}

/// A past (or newly arrived, not-yet-persisted) scheduling event, queued in
/// issue order for matching against the next intent the user code raises.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PastIntent {
    Activity { name: String, input: Value },
    SubOrchestration { name: String, instance_id: String, input: Value },
    Timer { fire_at: DateTime<Utc> },
    SendEvent { target_instance_id: String, name: String, input: Value },
}

impl PastIntent {
    fn describe(&self) -> &'static str {
        match self {
            Self::Activity { .. } => "activity",
            Self::SubOrchestration { .. } => "sub_orchestration",
            Self::Timer { .. } => "timer",
            Self::SendEvent { .. } => "send_event",
        }
    }

    /// Whether `self` (a past, already-recorded intent) is consistent with
    /// `new` (the intent orchestrator code just issued at the same
    /// position), comparing each variant's selector fields: `name` for
    /// activities/sub-orchestrations, `fire_at` for timers, and
    /// `target_instance_id` + `name` for sent events. Payloads are not
    /// compared — only the identity of what was scheduled.
    fn matches(&self, new: &PastIntent) -> bool {
        match (self, new) {
            (Self::Activity { name: a, .. }, Self::Activity { name: b, .. }) => a == b,
            (Self::SubOrchestration { name: a, .. }, Self::SubOrchestration { name: b, .. }) => a == b,
            (Self::Timer { fire_at: a }, Self::Timer { fire_at: b }) => a == b,
            (
                Self::SendEvent { target_instance_id: a, name: an, .. },
                Self::SendEvent { target_instance_id: b, name: bn, .. },
            ) => a == b && an == bn,
            _ => false,
        }
    }
}

struct Inner {
    instance_id: String,
    is_replaying: bool,
    current_time: DateTime<Utc>,
    next_id: i64,
    scheduled: VecDeque<(i64, PastIntent)>,
    completions: HashMap<i64, Outcome>,
    external_events: HashMap<String, VecDeque<Value>>,
    actions: Vec<OrchestrationAction>,
    custom_status: Option<String>,
    terminal: Option<OrchestrationAction>,
    nondeterminism: Option<FailureDetails>,
    rng: DeterministicSource,
}

impl Inner {
    fn claim_or_emit(&mut self, intent: PastIntent) -> i64 {
        if let Some((id, past)) = self.scheduled.pop_front() {
            if !past.matches(&intent) {
                self.nondeterminism.get_or_insert_with(|| {
                    FailureDetails::non_determinism(format!(
                        "expected a {} intent at id {id}, but orchestrator code issued a {} (history recorded {past:?}, replay issued {intent:?})",
                        past.describe(),
                        intent.describe()
                    ))
                });
            }
            id
        } else {
            self.is_replaying = false;
            let id = self.next_id;
            self.next_id += 1;
            self.actions.push(intent_to_action(id, intent));
            id
        }
    }
}

/// Shared mutable turn state. `Arc<Mutex<..>>` rather than `Rc<RefCell<..>>`
/// so the orchestrator's future stays `Send`, which the dispatcher needs to
/// run turns on `tokio::spawn`.
#[derive(Clone)]
pub struct OrchestrationContext {
    inner: Arc<Mutex<Inner>>,
}

impl OrchestrationContext {
    pub(crate) fn new(
        instance_id: String,
        current_time: DateTime<Utc>,
        scheduled: VecDeque<(i64, PastIntent)>,
        completions: HashMap<i64, Outcome>,
        external_events: HashMap<String, VecDeque<Value>>,
        next_id: i64,
        rng: DeterministicSource,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                instance_id,
                is_replaying: true,
                current_time,
                next_id,
                scheduled,
                completions,
                external_events,
                actions: Vec::new(),
                custom_status: None,
                terminal: None,
                nondeterminism: None,
                rng,
            })),
        }
    }

    pub fn instance_id(&self) -> String {
        self.inner.lock().instance_id.clone()
    }

    /// Whether the runner is still feeding already-known history, as
    /// opposed to producing brand-new live actions.
    pub fn is_replaying(&self) -> bool {
        self.inner.lock().is_replaying
    }

    /// Deterministic wall clock: the timestamp of the turn's
    /// `OrchestratorStarted` marker, never the real wall clock.
    pub fn current_utc_datetime(&self) -> DateTime<Utc> {
        self.inner.lock().current_time
    }

    /// A deterministic, replay-stable UUID, drawn from the turn's seeded
    /// generator. Safe to call any number of times as long as user
    /// code calls it in the same order on every replay.
    pub fn new_guid(&self) -> uuid::Uuid {
        self.inner.lock().rng.next_uuid()
    }

    /// A deterministic random value in `range`, same caveat as
    /// [`Self::new_guid`].
    pub fn gen_range<T: rand::distributions::uniform::SampleUniform + PartialOrd>(&self, range: std::ops::Range<T>) -> T {
        self.inner.lock().rng.gen_range(range)
    }

    pub fn set_custom_status(&self, value: impl Into<String>) {
        self.inner.lock().custom_status = Some(value.into());
    }

    pub fn schedule_activity<T: DeserializeOwned + 'static>(
        &self,
        name: impl Into<String>,
        input: Value,
    ) -> DurableFuture<T> {
        let name = name.into();
        let id = {
            let mut inner = self.inner.lock();
            inner.claim_or_emit(PastIntent::Activity { name, input })
        };
        DurableFuture::new(self.inner.clone(), id)
    }

    pub fn schedule_sub_orchestration<T: DeserializeOwned + 'static>(
        &self,
        name: impl Into<String>,
        instance_id: impl Into<String>,
        input: Value,
    ) -> DurableFuture<T> {
        let name = name.into();
        let instance_id = instance_id.into();
        let id = {
            let mut inner = self.inner.lock();
            inner.claim_or_emit(PastIntent::SubOrchestration { name, instance_id, input })
        };
        DurableFuture::new(self.inner.clone(), id)
    }

    pub fn create_timer(&self, fire_at: DateTime<Utc>) -> DurableFuture<()> {
        let id = {
            let mut inner = self.inner.lock();
            inner.claim_or_emit(PastIntent::Timer { fire_at })
        };
        DurableFuture::new(self.inner.clone(), id)
    }

    /// Fire-and-forget; does not suspend the caller.
    pub fn send_event(&self, target_instance_id: impl Into<String>, name: impl Into<String>, payload: Value) {
        let target_instance_id = target_instance_id.into();
        let name = name.into();
        let mut inner = self.inner.lock();
        inner.claim_or_emit(PastIntent::SendEvent {
            target_instance_id,
            name,
            input: payload,
        });
    }

    pub fn wait_for_external_event<T: DeserializeOwned + 'static>(&self, name: impl Into<String>) -> ExternalEventFuture<T> {
        ExternalEventFuture::new(self.inner.clone(), name.into())
    }

    /// Ends the current execution and starts a fresh one under the same
    /// instance id. Orchestrator code should return promptly
    /// after calling this; the recorded terminal action wins regardless of
    /// what the `run` future ultimately returns.
    pub fn continue_as_new(&self, new_input: Value, preserve_unprocessed_events: bool) {
        let mut inner = self.inner.lock();
        let now = inner.current_time;
        let carry_over_messages = if preserve_unprocessed_events {
            inner
                .external_events
                .iter()
                .flat_map(|(name, values)| {
                    values.iter().map(move |v| HistoryEvent::EventReceived {
                        id: 0,
                        timestamp: now,
                        name: name.clone(),
                        input: v.clone(),
                    })
                })
                .collect()
        } else {
            Vec::new()
        };
        inner.terminal = Some(OrchestrationAction::continue_as_new(ContinueAsNewPayload {
            input: new_input,
            version: None,
            carry_over_messages,
        }));
    }

    /// Snapshot the turn's accumulated actions once the scheduler can make
    /// no further progress. Pending awaitables (futures still held by a
    /// suspended `run` future) may keep other clones of the inner state
    /// alive, so this reads through the shared lock rather than unwrapping
    /// the `Arc`.
    pub(crate) fn into_turn_output(self) -> TurnOutput {
        let inner = self.inner.lock();
        TurnOutput {
            actions: inner.actions.clone(),
            custom_status: inner.custom_status.clone(),
            terminal: inner.terminal.clone(),
            nondeterminism: inner.nondeterminism.clone(),
        }
    }
}

/// What a turn produced, once the scheduler can make no further progress
///.
pub(crate) struct TurnOutput {
    pub actions: Vec<OrchestrationAction>,
    pub custom_status: Option<String>,
    pub terminal: Option<OrchestrationAction>,
    pub nondeterminism: Option<FailureDetails>,
}

fn intent_to_action(id: i64, intent: PastIntent) -> OrchestrationAction {
    match intent {
        PastIntent::Activity { name, input } => OrchestrationAction::ScheduleActivity { id, name, input },
        PastIntent::SubOrchestration { name, instance_id, input } => {
            OrchestrationAction::ScheduleSubOrchestration { id, name, instance_id, input }
        }
        PastIntent::Timer { fire_at } => OrchestrationAction::CreateTimer { id, fire_at },
        PastIntent::SendEvent { target_instance_id, name, input } => OrchestrationAction::SendEvent {
            id,
            target_instance_id,
            name,
            input,
        },
    }
}

/// An awaitable resolving to the outcome of a scheduled activity, timer, or
/// sub-orchestration.
pub struct DurableFuture<T> {
    inner: Arc<Mutex<Inner>>,
    id: i64,
    _marker: std::marker::PhantomData<T>,
}

impl<T> DurableFuture<T> {
    fn new(inner: Arc<Mutex<Inner>>, id: i64) -> Self {
        Self { inner, id, _marker: std::marker::PhantomData }
    }
}

impl<T: DeserializeOwned> Future for DurableFuture<T> {
    type Output = Result<T, OrchestrationError>;

    fn poll(self: Pin<&mut Self>, _cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let outcome = self.inner.lock().completions.remove(&self.id);
        match outcome {
            Some(Outcome::Value(value)) => {
                let decoded = serde_json::from_value(value)
                    .map_err(|e| OrchestrationError::user(format!("failed to decode activity result: {e}")));
                Poll::Ready(decoded)
            }
            Some(Outcome::Failure(failure)) => Poll::Ready(Err(OrchestrationError::Failed(failure))),
            None => Poll::Pending,
        }
    }
}

/// An awaitable resolving to the next unclaimed `EventReceived` payload
/// matching a name.
pub struct ExternalEventFuture<T> {
    inner: Arc<Mutex<Inner>>,
    name: String,
    _marker: std::marker::PhantomData<T>,
}

impl<T> ExternalEventFuture<T> {
    fn new(inner: Arc<Mutex<Inner>>, name: String) -> Self {
        Self { inner, name, _marker: std::marker::PhantomData }
    }
}

impl<T: DeserializeOwned> Future for ExternalEventFuture<T> {
    type Output = Result<T, OrchestrationError>;

    fn poll(self: Pin<&mut Self>, _cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let value = {
            let mut inner = self.inner.lock();
            inner.external_events.get_mut(&self.name).and_then(|q| q.pop_front())
        };
        match value {
            Some(value) => Poll::Ready(
                serde_json::from_value(value)
                    .map_err(|e| OrchestrationError::user(format!("failed to decode external event payload: {e}"))),
            ),
            None => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::task::noop_waker_ref;

    fn empty_ctx(scheduled: VecDeque<(i64, PastIntent)>) -> OrchestrationContext {
        let next_id = scheduled.len() as i64;
        OrchestrationContext::new(
            "instance-1".to_string(),
            Utc::now(),
            scheduled,
            HashMap::new(),
            HashMap::new(),
            next_id,
            DeterministicSource::new("instance-1", 0),
        )
    }

    #[test]
    fn claim_or_emit_accepts_a_matching_replayed_activity() {
        let mut scheduled = VecDeque::new();
        scheduled.push_back((0, PastIntent::Activity { name: "charge_card".into(), input: serde_json::json!({}) }));
        let ctx = empty_ctx(scheduled);

        let _future = ctx.schedule_activity::<serde_json::Value>("charge_card", serde_json::json!({}));

        let output = ctx.into_turn_output();
        assert!(output.nondeterminism.is_none());
        assert!(output.actions.is_empty(), "a matched replay must not emit a new action");
    }

    #[test]
    fn claim_or_emit_flags_a_mismatched_activity_name() {
        let mut scheduled = VecDeque::new();
        scheduled.push_back((0, PastIntent::Activity { name: "charge_card".into(), input: serde_json::json!({}) }));
        let ctx = empty_ctx(scheduled);

        let _future = ctx.schedule_activity::<serde_json::Value>("ship_order", serde_json::json!({}));

        let output = ctx.into_turn_output();
        let failure = output.nondeterminism.expect("mismatched activity name must raise NonDeterminism");
        assert_eq!(failure.error_type, FailureDetails::NON_DETERMINISM);
    }

    #[test]
    fn claim_or_emit_flags_a_mismatched_timer_fire_at() {
        let recorded_fire_at = Utc::now();
        let mut scheduled = VecDeque::new();
        scheduled.push_back((0, PastIntent::Timer { fire_at: recorded_fire_at }));
        let ctx = empty_ctx(scheduled);

        let different_fire_at = recorded_fire_at + chrono::Duration::seconds(1);
        let _future = ctx.create_timer(different_fire_at);

        let output = ctx.into_turn_output();
        assert!(output.nondeterminism.is_some(), "a recomputed fire_at must not silently bind to the old timer");
    }

    #[test]
    fn claim_or_emit_does_not_compare_activity_payloads() {
        // Only the selector fields (name, fire_at, target+name) are checked;
        // a differing input is not itself nondeterminism.
        let mut scheduled = VecDeque::new();
        scheduled.push_back((0, PastIntent::Activity { name: "charge_card".into(), input: serde_json::json!({"amount": 1}) }));
        let ctx = empty_ctx(scheduled);

        let _future = ctx.schedule_activity::<serde_json::Value>("charge_card", serde_json::json!({"amount": 2}));

        let output = ctx.into_turn_output();
        assert!(output.nondeterminism.is_none());
    }

    fn poll_once<F: Future>(future: &mut Pin<Box<F>>) -> Poll<F::Output> {
        let waker = noop_waker_ref();
        let mut cx = TaskContext::from_waker(waker);
        future.as_mut().poll(&mut cx)
    }

    #[test]
    fn durable_future_resolves_once_its_completion_is_recorded() {
        let inner = Arc::new(Mutex::new(Inner {
            instance_id: "instance-1".to_string(),
            is_replaying: false,
            current_time: Utc::now(),
            next_id: 1,
            scheduled: VecDeque::new(),
            completions: HashMap::new(),
            external_events: HashMap::new(),
            actions: Vec::new(),
            custom_status: None,
            terminal: None,
            nondeterminism: None,
            rng: DeterministicSource::new("instance-1", 0),
        }));

        let mut future: Pin<Box<DurableFuture<u32>>> = Box::pin(DurableFuture::new(inner.clone(), 0));
        assert!(matches!(poll_once(&mut future), Poll::Pending));

        inner.lock().completions.insert(0, Outcome::Value(serde_json::json!(42)));
        assert!(matches!(poll_once(&mut future), Poll::Ready(Ok(42))));
    }

    #[test]
    fn durable_future_surfaces_a_recorded_failure() {
        let inner = Arc::new(Mutex::new(Inner {
            instance_id: "instance-1".to_string(),
            is_replaying: false,
            current_time: Utc::now(),
            next_id: 1,
            scheduled: VecDeque::new(),
            completions: HashMap::from([(0, Outcome::Failure(FailureDetails::new("Boom", "card declined")))]),
            external_events: HashMap::new(),
            actions: Vec::new(),
            custom_status: None,
            terminal: None,
            nondeterminism: None,
            rng: DeterministicSource::new("instance-1", 0),
        }));

        let mut future: Pin<Box<DurableFuture<u32>>> = Box::pin(DurableFuture::new(inner, 0));
        assert!(matches!(poll_once(&mut future), Poll::Ready(Err(OrchestrationError::Failed(_)))));
    }

    #[test]
    fn external_event_future_resolves_then_goes_pending_once_drained() {
        let mut external_events = HashMap::new();
        external_events.insert("approval".to_string(), VecDeque::from([serde_json::json!(true)]));
        let inner = Arc::new(Mutex::new(Inner {
            instance_id: "instance-1".to_string(),
            is_replaying: false,
            current_time: Utc::now(),
            next_id: 0,
            scheduled: VecDeque::new(),
            completions: HashMap::new(),
            external_events,
            actions: Vec::new(),
            custom_status: None,
            terminal: None,
            nondeterminism: None,
            rng: DeterministicSource::new("instance-1", 0),
        }));

        let mut future: Pin<Box<ExternalEventFuture<bool>>> = Box::pin(ExternalEventFuture::new(inner.clone(), "approval".to_string()));
        assert!(matches!(poll_once(&mut future), Poll::Ready(Ok(true))));

        let mut second_wait: Pin<Box<ExternalEventFuture<bool>>> = Box::pin(ExternalEventFuture::new(inner, "approval".to_string()));
        assert!(matches!(poll_once(&mut second_wait), Poll::Pending));
    }
}
