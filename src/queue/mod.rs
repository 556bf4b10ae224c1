//! Queue transport abstraction: the boundary between a concrete
//! message queue and the dispatcher.

mod memory;
mod poller;
mod source;

pub use memory::InMemoryWorkItemSource;
pub use poller::{AdaptiveBackoff, PollerConfig};
pub use source::{
    QueueSink, ReceivedItem, SourceError, WorkItemSource, BATCH_CAP, MAX_POISON_VISIBILITY_DELAY, POISON_THRESHOLD,
};
