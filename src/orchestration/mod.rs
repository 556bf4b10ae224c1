//! Orchestrator-side runtime: the async context user code sees,
//! the registry that resolves an orchestration name to a handler, the
//! single-turn scheduler, and the runner that ties them together.

mod context;
mod error;
mod registry;
mod runner;
mod scheduler;

pub use context::{DurableFuture, ExternalEventFuture, OrchestrationContext};
pub use error::OrchestrationError;
pub use registry::{AnyOrchestration, Orchestration, OrchestrationRegistry, RegistryError};
pub use runner::{OrchestrationWorkItem, OrchestratorRunner, ScheduledDispatch, TurnDecision};
