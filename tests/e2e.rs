//! End-to-end scenarios run against the in-memory backend: a real
//! `Client` + `Dispatcher` + `InMemoryHistoryStore`, no mocked runner
//! internals.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use durable::prelude::*;
use durable::model::WorkItemKind;
use serde::{Deserialize, Serialize};
use serde_json::json;

fn build_dispatcher() -> (Arc<Client<InMemoryHistoryStore>>, Arc<Dispatcher<InMemoryHistoryStore>>, Arc<InMemoryWorkItemSource>)
{
    let store = Arc::new(InMemoryHistoryStore::new());
    let orchestration_source = Arc::new(InMemoryWorkItemSource::new(WorkItemKind::Orchestration));
    let activity_source = Arc::new(InMemoryWorkItemSource::new(WorkItemKind::Activity));

    let mut orchestrations = OrchestrationRegistry::new();
    register_orchestrations(&mut orchestrations);
    let mut activities = ActivityRegistry::new();
    register_activities(&mut activities);

    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        Arc::new(orchestrations),
        Arc::new(activities),
        orchestration_source.clone(),
        orchestration_source.clone(),
        activity_source.clone(),
        activity_source.clone(),
        DispatcherConfig::default(),
    ));
    dispatcher.start().expect("dispatcher should start");

    let client = Arc::new(Client::new(store, orchestration_source.clone()));
    (client, dispatcher, orchestration_source)
}

// ---------------------------------------------------------------------
// Orchestrations and activities shared across scenarios
// ---------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct Name {
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Greeting {
    greeting: String,
}

struct SayHello;

#[async_trait]
impl Activity for SayHello {
    const TYPE: &'static str = "say_hello";
    type Input = Name;
    type Output = Greeting;

    async fn execute(&self, _ctx: &ActivityContext, input: Self::Input) -> Result<Self::Output, ActivityError> {
        Ok(Greeting { greeting: format!("Hello, {}!", input.name) })
    }
}

struct GreetOrchestration;

#[async_trait]
impl Orchestration for GreetOrchestration {
    const NAME: &'static str = "greet";
    type Input = Name;
    type Output = Greeting;

    async fn run(ctx: OrchestrationContext, input: Self::Input) -> Result<Self::Output, OrchestrationError> {
        ctx.schedule_activity::<Greeting>("say_hello", serde_json::to_value(input).unwrap()).await
    }
}

struct SleepThenGreet;

#[async_trait]
impl Orchestration for SleepThenGreet {
    const NAME: &'static str = "sleep_then_greet";
    type Input = Name;
    type Output = Greeting;

    async fn run(ctx: OrchestrationContext, input: Self::Input) -> Result<Self::Output, OrchestrationError> {
        let fire_at = ctx.current_utc_datetime() + chrono::Duration::milliseconds(50);
        ctx.create_timer(fire_at).await?;
        ctx.schedule_activity::<Greeting>("say_hello", serde_json::to_value(input).unwrap()).await
    }
}

struct WaitForApproval;

#[async_trait]
impl Orchestration for WaitForApproval {
    const NAME: &'static str = "wait_for_approval";
    type Input = ();
    type Output = bool;

    async fn run(ctx: OrchestrationContext, _input: ()) -> Result<bool, OrchestrationError> {
        let approved: bool = ctx.wait_for_external_event("approval").await?;
        Ok(approved)
    }
}

struct FlakyActivity;

#[async_trait]
impl Activity for FlakyActivity {
    const TYPE: &'static str = "flaky";
    type Input = ();
    type Output = ();

    async fn execute(&self, _ctx: &ActivityContext, _input: ()) -> Result<(), ActivityError> {
        Err(ActivityError::retryable("not yet"))
    }
}

struct RetryUntilExhausted;

#[async_trait]
impl Orchestration for RetryUntilExhausted {
    const NAME: &'static str = "retry_until_exhausted";
    type Input = ();
    type Output = ();

    async fn run(ctx: OrchestrationContext, _input: ()) -> Result<(), OrchestrationError> {
        let policy = RetryPolicy::exponential()
            .with_max_attempts(3)
            .with_first_interval(Duration::from_millis(5))
            .with_max_interval(Duration::from_millis(5));
        durable::retry::schedule_activity_with_retry::<()>(&ctx, "flaky", json!(null), &policy).await
    }
}

struct CountUp;

#[async_trait]
impl Orchestration for CountUp {
    const NAME: &'static str = "count_up";
    type Input = u32;
    type Output = u32;

    async fn run(ctx: OrchestrationContext, count: u32) -> Result<u32, OrchestrationError> {
        if count >= 3 {
            return Ok(count);
        }
        ctx.continue_as_new(json!(count + 1), false);
        Ok(count)
    }
}

fn register_orchestrations(registry: &mut OrchestrationRegistry) {
    registry.register::<GreetOrchestration>();
    registry.register::<SleepThenGreet>();
    registry.register::<WaitForApproval>();
    registry.register::<RetryUntilExhausted>();
    registry.register::<CountUp>();
}

fn register_activities(registry: &mut ActivityRegistry) {
    registry.register(SayHello);
    registry.register(FlakyActivity);
}

// ---------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------

#[tokio::test]
async fn hello_activity_completes() {
    let (client, dispatcher, _orch_source) = build_dispatcher();

    let instance_id = client.schedule("greet", json!({"name": "World"}), ScheduleOptions::default()).await.unwrap();
    let row = tokio::time::timeout(Duration::from_secs(5), client.wait_for_completion(&instance_id, None)).await.unwrap().unwrap();

    assert_eq!(row.status, OrchestrationStatus::Completed);
    let output: Greeting = serde_json::from_value(row.output.unwrap()).unwrap();
    assert_eq!(output.greeting, "Hello, World!");

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn timer_then_activity_completes() {
    let (client, dispatcher, _orch_source) = build_dispatcher();

    let instance_id = client.schedule("sleep_then_greet", json!({"name": "Timer"}), ScheduleOptions::default()).await.unwrap();
    let row = tokio::time::timeout(Duration::from_secs(5), client.wait_for_completion(&instance_id, None)).await.unwrap().unwrap();

    assert_eq!(row.status, OrchestrationStatus::Completed);
    let output: Greeting = serde_json::from_value(row.output.unwrap()).unwrap();
    assert_eq!(output.greeting, "Hello, Timer!");

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn external_event_unblocks_orchestration() {
    let (client, dispatcher, _orch_source) = build_dispatcher();

    let instance_id = client.schedule("wait_for_approval", json!(null), ScheduleOptions::default()).await.unwrap();
    client.wait_for_start(&instance_id, None).await.unwrap();

    client.raise_event(&instance_id, "approval", Some(json!(true))).await.unwrap();
    let row = tokio::time::timeout(Duration::from_secs(5), client.wait_for_completion(&instance_id, None)).await.unwrap().unwrap();

    assert_eq!(row.status, OrchestrationStatus::Completed);
    assert_eq!(row.output, Some(json!(true)));

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn retry_policy_exhausts_and_fails() {
    let (client, dispatcher, _orch_source) = build_dispatcher();

    let instance_id = client.schedule("retry_until_exhausted", json!(null), ScheduleOptions::default()).await.unwrap();
    let row = tokio::time::timeout(Duration::from_secs(5), client.wait_for_completion(&instance_id, None)).await.unwrap().unwrap();

    assert_eq!(row.status, OrchestrationStatus::Failed);
    assert!(row.failure.is_some());

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn terminate_stops_a_running_instance() {
    let (client, dispatcher, _orch_source) = build_dispatcher();

    let instance_id = client.schedule("wait_for_approval", json!(null), ScheduleOptions::default()).await.unwrap();
    client.wait_for_start(&instance_id, None).await.unwrap();

    client.terminate(&instance_id, Some(json!({"reason": "cancelled by operator"}))).await.unwrap();
    let row = client.get(&instance_id, true).await.unwrap();

    assert_eq!(row.status, OrchestrationStatus::Terminated);
    assert_eq!(row.output, Some(json!({"reason": "cancelled by operator"})));

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn purge_removes_instance_state() {
    let (client, dispatcher, _orch_source) = build_dispatcher();

    let instance_id = client.schedule("greet", json!({"name": "Gone"}), ScheduleOptions::default()).await.unwrap();
    client.wait_for_completion(&instance_id, None).await.unwrap();

    client.purge(&instance_id).await.unwrap();
    let result = client.get(&instance_id, true).await;
    assert!(matches!(result, Err(ClientError::InstanceNotFound(_))));

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn continue_as_new_runs_through_several_executions() {
    let (client, dispatcher, _orch_source) = build_dispatcher();

    let instance_id = client.schedule("count_up", json!(0), ScheduleOptions::default()).await.unwrap();
    let row = tokio::time::timeout(Duration::from_secs(5), client.wait_for_completion(&instance_id, None)).await.unwrap().unwrap();

    assert_eq!(row.status, OrchestrationStatus::Completed);
    assert_eq!(row.output, Some(json!(3)));

    dispatcher.shutdown().await.unwrap();
}
