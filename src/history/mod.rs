//! Persistence layer: the per-instance history log plus state row.

mod memory;
mod postgres;
mod store;

pub use memory::InMemoryHistoryStore;
pub use postgres::PostgresHistoryStore;
pub use store::{AppendOutcome, HistoryStore, InstanceFilter, InstanceUpdate, StoreError};
