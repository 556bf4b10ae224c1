//! # Durable Workflow Runtime
//!
//! A storage-agnostic durable-execution engine: orchestrations are plain
//! `async fn`s replayed deterministically against an event-sourced history,
//! activities are ordinary at-least-once units of work, and a dispatcher
//! pipeline ties user code to whatever queue/database backs a deployment.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Client                               │
//! │  (schedule / raise_event / terminate / wait_for_completion)  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Dispatcher                             │
//! │   orchestration queue ──▶ OrchestratorRunner ──▶ HistoryStore │
//! │   activity queue      ──▶ ActivityRunner                     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       HistoryStore                            │
//! │        (PostgreSQL: durable_instances, durable_history)       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use durable::prelude::*;
//!
//! struct ShipOrder;
//!
//! #[async_trait::async_trait]
//! impl Orchestration for ShipOrder {
//!     const NAME: &'static str = "ship_order";
//!     type Input = OrderId;
//!     type Output = ShipmentConfirmation;
//!
//!     async fn run(ctx: OrchestrationContext, order: OrderId) -> Result<ShipmentConfirmation, OrchestrationError> {
//!         let charge: ChargeResult = ctx.schedule_activity("charge_card", order).await?;
//!         ctx.create_timer(ctx.current_utc_datetime() + chrono::Duration::hours(1)).await?;
//!         ctx.schedule_activity("ship", charge).await
//!     }
//! }
//! ```

pub mod activity;
pub mod client;
pub mod config;
pub mod converter;
pub mod dispatch;
pub mod history;
pub mod ids;
pub mod model;
pub mod orchestration;
pub mod paged;
pub mod queue;
pub mod retry;

/// Prelude for common imports.
pub mod prelude {
    pub use crate::activity::{Activity, ActivityContext, ActivityError, ActivityRegistry};
    pub use crate::client::{Client, ClientError, ScheduleOptions};
    pub use crate::config::{ConfigError, RuntimeConfig};
    pub use crate::converter::{DataConverter, JsonDataConverter};
    pub use crate::dispatch::{Dispatcher, DispatcherConfig, DispatcherError};
    pub use crate::history::{HistoryStore, InMemoryHistoryStore, PostgresHistoryStore, StoreError};
    pub use crate::model::{FailureDetails, HistoryEvent, InstanceRow, OrchestrationStatus, WorkDispatch};
    pub use crate::orchestration::{Orchestration, OrchestrationContext, OrchestrationError, OrchestrationRegistry};
    pub use crate::paged::{OperationHandle, Page, PagedStream};
    pub use crate::queue::{InMemoryWorkItemSource, QueueSink, SourceError, WorkItemSource};
    pub use crate::retry::RetryPolicy;
}

// Re-export key types at crate root.
pub use activity::{Activity, ActivityContext, ActivityError};
pub use client::{Client, ClientError};
pub use dispatch::{Dispatcher, DispatcherConfig};
pub use history::{HistoryStore, StoreError};
pub use orchestration::{Orchestration, OrchestrationContext, OrchestrationError};
pub use retry::RetryPolicy;
