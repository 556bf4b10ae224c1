//! The orchestrator turn engine.
//!
//! One call to [`OrchestratorRunner::execute_turn`] is one turn: rebuild the
//! in-memory lookup structures from history, drive the registered
//! orchestration's `run` future with [`super::scheduler::drain`], and fold
//! whatever it scheduled into a [`TurnDecision`] ready for the four-step
//! commit protocol, replaying past events before live ones and driving
//! everything through an `async` context instead of per-event callbacks.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{instrument, warn};

use crate::history::InstanceUpdate;
use crate::ids::DeterministicSource;
use crate::model::{
    ContinueAsNewPayload, FailureDetails, HistoryEvent, OrchestrationAction, OrchestrationStatus, ParentInstance,
    WorkDispatch,
};

use super::context::{Outcome, OrchestrationContext, PastIntent};
use super::registry::OrchestrationRegistry;
use super::scheduler;

/// One unit of work for the runner: everything needed to replay-then-decide
/// one turn.
pub struct OrchestrationWorkItem {
    pub instance_id: String,
    pub name: String,
    /// `Some` only for a sub-orchestration instance.
    pub parent: Option<ParentInstance>,
    /// Already-persisted history, in append order.
    pub past: Vec<HistoryEvent>,
    /// The event(s) that triggered this turn (an activity completion, a
    /// timer fire, a raised event, or just `ExecutionStarted` for a brand
    /// new instance), not yet durable. Any `id` field on these is a
    /// placeholder the runner renumbers to keep history dense (I1).
    pub new: Vec<HistoryEvent>,
}

/// A dispatch ready to enqueue, with the delay its queue transport should
/// apply before making it visible (used for durable timers).
#[derive(Debug, Clone)]
pub struct ScheduledDispatch {
    pub dispatch: WorkDispatch,
    pub delay: Duration,
}

/// What a turn decided, ready for the commit protocol: append
/// `events_to_append`, merge `state_update`, enqueue `dispatches`, then
/// delete the triggering message.
#[derive(Debug)]
pub struct TurnDecision {
    pub events_to_append: Vec<HistoryEvent>,
    pub dispatches: Vec<ScheduledDispatch>,
    pub state_update: InstanceUpdate,
    pub continue_as_new: Option<ContinueAsNewPayload>,
}

/// Executes orchestrator turns against a registry of user-defined
/// orchestrations. Holds no store or queue handle itself: committing a
/// [`TurnDecision`] is the dispatcher's job, keeping replay (pure, testable
/// without I/O) separate from persistence.
pub struct OrchestratorRunner {
    registry: std::sync::Arc<OrchestrationRegistry>,
}

impl OrchestratorRunner {
    pub fn new(registry: std::sync::Arc<OrchestrationRegistry>) -> Self {
        Self { registry }
    }

    #[instrument(skip(self, item), fields(instance_id = %item.instance_id, name = %item.name))]
    pub async fn execute_turn(&self, item: OrchestrationWorkItem) -> TurnDecision {
        let OrchestrationWorkItem { instance_id, name, parent: _, past, new } = item;

        let max_past_id = past.iter().filter_map(event_id).max();
        let mut cursor = max_past_id.map(|m| m + 1).unwrap_or(0);

        let mut new = new;
        for event in &mut new {
            renumber(event, &mut cursor);
        }

        // `current_utc_datetime()` must reproduce exactly the value used when
        // any already-recorded decision was first made, or replaying a prior
        // turn's `create_timer`/`schedule_activity` call would recompute a
        // different selector field (e.g. `fire_at`) and be flagged as
        // nondeterminism. So the turn's deterministic clock is the most
        // recent `OrchestratorStarted` timestamp already in `past`, not real
        // wall time — real time is used only for the fresh marker this turn
        // appends, which becomes "the most recent" for the *next* turn.
        let replay_time = past.iter().rev().find_map(|event| match event {
            HistoryEvent::OrchestratorStarted { timestamp } => Some(*timestamp),
            _ => None,
        });
        let marker_timestamp = Utc::now();
        let current_time = replay_time.unwrap_or(marker_timestamp);
        let mut events_to_append = vec![HistoryEvent::OrchestratorStarted { timestamp: marker_timestamp }];

        let mut input = Value::Null;
        let mut scheduled = VecDeque::new();
        let mut completions = HashMap::new();
        let mut external_events: HashMap<String, VecDeque<Value>> = HashMap::new();

        for event in past.iter().chain(new.iter()) {
            fold_event(event, &mut input, &mut scheduled, &mut completions, &mut external_events);
        }

        events_to_append.extend(new);

        let next_id = cursor;

        let handler = match self.registry.create(&name) {
            Ok(handler) => handler,
            Err(_) => {
                warn!(%name, "no orchestration registered for this name");
                let failure = FailureDetails::task_missing(&name);
                events_to_append.push(HistoryEvent::ExecutionCompleted {
                    id: next_id,
                    timestamp: current_time,
                    result: None,
                    failure: Some(failure.clone()),
                });
                return TurnDecision {
                    events_to_append,
                    dispatches: Vec::new(),
                    state_update: InstanceUpdate {
                        status: Some(OrchestrationStatus::Failed),
                        failure: Some(failure),
                        ..Default::default()
                    },
                    continue_as_new: None,
                };
            }
        };

        let rng = DeterministicSource::new(&instance_id, next_id);
        let ctx = OrchestrationContext::new(instance_id.clone(), current_time, scheduled, completions, external_events, next_id, rng);

        let run_future = {
            let ctx = ctx.clone();
            Box::pin(async move { handler.run(ctx, input).await })
        };
        let result = scheduler::drain(run_future);
        let output = ctx.into_turn_output();

        for action in &output.actions {
            if let Some(event) = action_to_new_event(action, current_time) {
                events_to_append.push(event);
            }
        }

        let dispatches = output
            .actions
            .iter()
            .filter_map(|action| action_to_dispatch(&instance_id, &name, action, current_time))
            .collect();

        let mut state_update = InstanceUpdate {
            sub_status: output.custom_status,
            ..Default::default()
        };
        let mut continue_as_new = None;

        if let Some(nondeterminism) = output.nondeterminism {
            events_to_append.push(HistoryEvent::ExecutionCompleted {
                id: next_id,
                timestamp: current_time,
                result: None,
                failure: Some(nondeterminism.clone()),
            });
            state_update.status = Some(OrchestrationStatus::Failed);
            state_update.failure = Some(nondeterminism);
        } else if let Some(terminal) = output.terminal {
            apply_terminal(terminal, next_id, current_time, &mut events_to_append, &mut state_update, &mut continue_as_new);
        } else {
            match result {
                Some(Ok(value)) => {
                    events_to_append.push(HistoryEvent::ExecutionCompleted {
                        id: next_id,
                        timestamp: current_time,
                        result: Some(value.clone()),
                        failure: None,
                    });
                    state_update.status = Some(OrchestrationStatus::Completed);
                    state_update.output = Some(value);
                }
                Some(Err(err)) => {
                    let failure: FailureDetails = err.into();
                    events_to_append.push(HistoryEvent::ExecutionCompleted {
                        id: next_id,
                        timestamp: current_time,
                        result: None,
                        failure: Some(failure.clone()),
                    });
                    state_update.status = Some(OrchestrationStatus::Failed);
                    state_update.failure = Some(failure);
                }
                None => state_update.status = Some(OrchestrationStatus::Running),
            }
        }

        TurnDecision { events_to_append, dispatches, state_update, continue_as_new }
    }
}

/// The `id` field of variants that carry one; `None` for the two bookkeeping
/// markers that don't.
fn event_id(event: &HistoryEvent) -> Option<i64> {
    match event {
        HistoryEvent::OrchestratorStarted { .. } | HistoryEvent::ExecutionStarted { .. } => None,
        HistoryEvent::ExecutionCompleted { id, .. }
        | HistoryEvent::ExecutionTerminated { id, .. }
        | HistoryEvent::ContinueAsNew { id, .. }
        | HistoryEvent::TaskActivityScheduled { id, .. }
        | HistoryEvent::TaskActivityCompleted { id, .. }
        | HistoryEvent::SubOrchestrationScheduled { id, .. }
        | HistoryEvent::SubOrchestrationCompleted { id, .. }
        | HistoryEvent::TimerScheduled { id, .. }
        | HistoryEvent::TimerFired { id, .. }
        | HistoryEvent::EventSent { id, .. }
        | HistoryEvent::EventReceived { id, .. }
        | HistoryEvent::GenericMessage { id, .. } => Some(*id),
    }
}

/// Overwrite a freshly-arrived event's `id` with the next value off
/// `cursor`, so appending it keeps history dense regardless of whatever
/// placeholder the sender used.
fn renumber(event: &mut HistoryEvent, cursor: &mut i64) {
    let slot = match event {
        HistoryEvent::OrchestratorStarted { .. } | HistoryEvent::ExecutionStarted { .. } => return,
        HistoryEvent::ExecutionCompleted { id, .. }
        | HistoryEvent::ExecutionTerminated { id, .. }
        | HistoryEvent::ContinueAsNew { id, .. }
        | HistoryEvent::TaskActivityScheduled { id, .. }
        | HistoryEvent::TaskActivityCompleted { id, .. }
        | HistoryEvent::SubOrchestrationScheduled { id, .. }
        | HistoryEvent::SubOrchestrationCompleted { id, .. }
        | HistoryEvent::TimerScheduled { id, .. }
        | HistoryEvent::TimerFired { id, .. }
        | HistoryEvent::EventSent { id, .. }
        | HistoryEvent::EventReceived { id, .. }
        | HistoryEvent::GenericMessage { id, .. } => id,
    };
    *slot = *cursor;
    *cursor += 1;
}

fn fold_event(
    event: &HistoryEvent,
    input: &mut Value,
    scheduled: &mut VecDeque<(i64, PastIntent)>,
    completions: &mut HashMap<i64, Outcome>,
    external_events: &mut HashMap<String, VecDeque<Value>>,
) {
    match event {
        HistoryEvent::ExecutionStarted { input: i, .. } => *input = i.clone(),
        HistoryEvent::TaskActivityScheduled { id, name, input, .. } => {
            scheduled.push_back((*id, PastIntent::Activity { name: name.clone(), input: input.clone() }));
        }
        HistoryEvent::SubOrchestrationScheduled { id, name, instance_id, input, .. } => {
            scheduled.push_back((
                *id,
                PastIntent::SubOrchestration { name: name.clone(), instance_id: instance_id.clone(), input: input.clone() },
            ));
        }
        HistoryEvent::TimerScheduled { id, fire_at, .. } => {
            scheduled.push_back((*id, PastIntent::Timer { fire_at: *fire_at }));
        }
        HistoryEvent::EventSent { id, target_instance_id, name, input, .. } => {
            scheduled.push_back((
                *id,
                PastIntent::SendEvent { target_instance_id: target_instance_id.clone(), name: name.clone(), input: input.clone() },
            ));
        }
        HistoryEvent::TaskActivityCompleted { scheduled_id, result, failure, .. }
        | HistoryEvent::SubOrchestrationCompleted { scheduled_id, result, failure, .. } => {
            let outcome = match failure {
                Some(f) => Outcome::Failure(f.clone()),
                None => Outcome::Value(result.clone().unwrap_or(Value::Null)),
            };
            completions.insert(*scheduled_id, outcome);
        }
        HistoryEvent::TimerFired { scheduled_id, .. } => {
            completions.insert(*scheduled_id, Outcome::Value(Value::Null));
        }
        HistoryEvent::EventReceived { name, input, .. } => {
            external_events.entry(name.clone()).or_default().push_back(input.clone());
        }
        HistoryEvent::OrchestratorStarted { .. }
        | HistoryEvent::ExecutionCompleted { .. }
        | HistoryEvent::ExecutionTerminated { .. }
        | HistoryEvent::ContinueAsNew { .. }
        | HistoryEvent::GenericMessage { .. } => {}
    }
}

fn apply_terminal(
    action: OrchestrationAction,
    id: i64,
    timestamp: DateTime<Utc>,
    events: &mut Vec<HistoryEvent>,
    state_update: &mut InstanceUpdate,
    continue_as_new: &mut Option<ContinueAsNewPayload>,
) {
    let OrchestrationAction::CompleteOrchestration { status, result, failure, carry_over } = action else {
        return;
    };
    match carry_over {
        Some(payload) => {
            events.push(HistoryEvent::ContinueAsNew {
                id,
                timestamp,
                input: payload.input.clone(),
                version: payload.version.clone(),
                carry_over_messages: payload.carry_over_messages.clone(),
            });
            state_update.status = Some(OrchestrationStatus::Running);
            *continue_as_new = Some(payload);
        }
        None if status == OrchestrationStatus::Terminated => {
            let reason = result.as_ref().and_then(|v| v.as_str()).unwrap_or_default().to_string();
            events.push(HistoryEvent::ExecutionTerminated { id, timestamp, reason });
            state_update.status = Some(status);
            state_update.output = result;
        }
        None => {
            events.push(HistoryEvent::ExecutionCompleted { id, timestamp, result: result.clone(), failure: failure.clone() });
            state_update.status = Some(status);
            state_update.output = result;
            state_update.failure = failure;
        }
    }
}

fn action_to_new_event(action: &OrchestrationAction, timestamp: DateTime<Utc>) -> Option<HistoryEvent> {
    match action {
        OrchestrationAction::ScheduleActivity { id, name, input } => Some(HistoryEvent::TaskActivityScheduled {
            id: *id,
            timestamp,
            name: name.clone(),
            input: input.clone(),
        }),
        OrchestrationAction::ScheduleSubOrchestration { id, name, instance_id, input } => Some(HistoryEvent::SubOrchestrationScheduled {
            id: *id,
            timestamp,
            name: name.clone(),
            instance_id: instance_id.clone(),
            input: input.clone(),
        }),
        OrchestrationAction::CreateTimer { id, fire_at } => Some(HistoryEvent::TimerScheduled { id: *id, timestamp, fire_at: *fire_at }),
        OrchestrationAction::SendEvent { id, target_instance_id, name, input } => Some(HistoryEvent::EventSent {
            id: *id,
            timestamp,
            target_instance_id: target_instance_id.clone(),
            name: name.clone(),
            input: input.clone(),
        }),
        OrchestrationAction::CompleteOrchestration { .. } | OrchestrationAction::SetSubStatus { .. } => None,
    }
}

/// The live actions that also produce a queue dispatch, with the visibility
/// delay a timer's carries.
fn action_to_dispatch(
    instance_id: &str,
    name: &str,
    action: &OrchestrationAction,
    timestamp: DateTime<Utc>,
) -> Option<ScheduledDispatch> {
    let (dispatch, delay) = match action {
        OrchestrationAction::ScheduleActivity { id, name: activity_name, input } => (
            WorkDispatch::new(
                instance_id,
                HistoryEvent::TaskActivityScheduled { id: *id, timestamp, name: activity_name.clone(), input: input.clone() },
            ),
            Duration::ZERO,
        ),
        OrchestrationAction::ScheduleSubOrchestration { name: child_name, instance_id: child_id, input, .. } => (
            WorkDispatch::new(
                child_id.clone(),
                HistoryEvent::ExecutionStarted { timestamp, name: child_name.clone(), input: input.clone() },
            )
            .with_parent(ParentInstance { id: instance_id.to_string(), name: name.to_string(), queue: None }),
            Duration::ZERO,
        ),
        OrchestrationAction::CreateTimer { id, fire_at } => {
            let delay = (*fire_at - timestamp).to_std().unwrap_or(Duration::ZERO);
            (
                WorkDispatch::new(instance_id, HistoryEvent::TimerFired { id: *id, timestamp: *fire_at, scheduled_id: *id }),
                delay,
            )
        }
        OrchestrationAction::SendEvent { target_instance_id, name: event_name, input, .. } => (
            WorkDispatch::new(
                target_instance_id.clone(),
                HistoryEvent::EventReceived { id: 0, timestamp, name: event_name.clone(), input: input.clone() },
            ),
            Duration::ZERO,
        ),
        OrchestrationAction::CompleteOrchestration { .. } | OrchestrationAction::SetSubStatus { .. } => return None,
    };
    Some(ScheduledDispatch { dispatch, delay })
}
