//! Activity runner: executes one `TaskActivityScheduled` dispatch
//! against the registry and turns the result into either a
//! `TaskActivityCompleted` event or an abandoned lease.

use tracing::{instrument, warn};

use crate::model::{FailureDetails, HistoryEvent};

use super::context::ActivityContext;
use super::definition::ActivityError;
use super::registry::ActivityRegistry;

/// What running one activity attempt produced.
#[derive(Debug)]
pub enum ActivityOutcome {
    /// Emit a `TaskActivityCompleted` with this result/failure and delete
    /// the input message.
    Completed(HistoryEvent),
    /// Abandon the lease without emitting any completion; the item is
    /// redelivered for a fresh attempt (`AbortWorkItem`).
    Abort,
}

pub struct ActivityRunner {
    registry: std::sync::Arc<ActivityRegistry>,
}

impl ActivityRunner {
    pub fn new(registry: std::sync::Arc<ActivityRegistry>) -> Self {
        Self { registry }
    }

    /// Run `name` once. `scheduled_id` is the id of the `TaskActivityScheduled`
    /// event this attempt answers; it becomes the completion event's
    /// `scheduled_id` back-reference.
    #[instrument(skip(self, input), fields(instance_id, name, attempt))]
    pub async fn execute(
        &self,
        instance_id: &str,
        scheduled_id: i64,
        name: &str,
        input: serde_json::Value,
        attempt: u32,
        max_attempts: u32,
    ) -> ActivityOutcome {
        let timestamp = chrono::Utc::now();

        let handler = match self.registry.get(name) {
            Ok(handler) => handler,
            Err(_) => {
                warn!(%name, "no activity registered for this name");
                return ActivityOutcome::Completed(HistoryEvent::TaskActivityCompleted {
                    id: 0,
                    timestamp,
                    scheduled_id,
                    result: None,
                    failure: Some(FailureDetails::task_missing(name)),
                });
            }
        };

        let ctx = ActivityContext::new(instance_id.to_string(), scheduled_id, attempt, max_attempts);

        match handler.execute(&ctx, input).await {
            Ok(result) => ActivityOutcome::Completed(HistoryEvent::TaskActivityCompleted {
                id: 0,
                timestamp,
                scheduled_id,
                result: Some(result),
                failure: None,
            }),
            Err(err) if err.is_abort_work_item() => ActivityOutcome::Abort,
            Err(err) => {
                let failure: FailureDetails = err_into_failure(err);
                ActivityOutcome::Completed(HistoryEvent::TaskActivityCompleted {
                    id: 0,
                    timestamp,
                    scheduled_id,
                    result: None,
                    failure: Some(failure),
                })
            }
        }
    }
}

fn err_into_failure(err: ActivityError) -> FailureDetails {
    err.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::definition::Activity;
    use async_trait::async_trait;
    use serde_json::json;

    struct Flaky;

    #[async_trait]
    impl Activity for Flaky {
        const TYPE: &'static str = "flaky";
        type Input = ();
        type Output = String;

        async fn execute(&self, _ctx: &ActivityContext, _input: ()) -> Result<String, ActivityError> {
            Err(ActivityError::retryable("connection reset"))
        }
    }

    struct AbortsOnFirstTouch;

    #[async_trait]
    impl Activity for AbortsOnFirstTouch {
        const TYPE: &'static str = "aborts";
        type Input = ();
        type Output = ();

        async fn execute(&self, _ctx: &ActivityContext, _input: ()) -> Result<(), ActivityError> {
            Err(ActivityError::abort_work_item("dependency not ready yet"))
        }
    }

    fn runner(registry: ActivityRegistry) -> ActivityRunner {
        ActivityRunner::new(std::sync::Arc::new(registry))
    }

    #[tokio::test]
    async fn unknown_activity_completes_with_task_missing() {
        let runner = runner(ActivityRegistry::new());
        let outcome = runner.execute("inst-1", 1, "no_such_activity", json!(null), 1, 3).await;
        match outcome {
            ActivityOutcome::Completed(HistoryEvent::TaskActivityCompleted { failure: Some(f), .. }) => {
                assert!(f.is_task_missing());
            }
            other => panic!("expected a task-missing completion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn retryable_failure_still_completes_the_attempt() {
        let mut registry = ActivityRegistry::new();
        registry.register(Flaky);
        let outcome = runner(registry).execute("inst-1", 1, "flaky", json!(null), 1, 3).await;
        assert!(matches!(
            outcome,
            ActivityOutcome::Completed(HistoryEvent::TaskActivityCompleted { failure: Some(_), .. })
        ));
    }

    #[tokio::test]
    async fn abort_work_item_yields_no_completion() {
        let mut registry = ActivityRegistry::new();
        registry.register(AbortsOnFirstTouch);
        let outcome = runner(registry).execute("inst-1", 1, "aborts", json!(null), 1, 3).await;
        assert!(matches!(outcome, ActivityOutcome::Abort));
    }
}
