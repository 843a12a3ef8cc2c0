// Port Layer - Interfaces for external dependencies

pub mod counter_store;
pub mod document_store;
pub mod id_provider; // For deterministic testing
pub mod task_queue;
pub mod time_provider;
pub mod transaction;

// Re-exports
pub use counter_store::CounterStore;
pub use document_store::{DocumentStore, DocumentTransaction};
pub use id_provider::{IdProvider, UuidProvider};
pub use task_queue::{StaleSweep, TaskQueue};
pub use time_provider::{SystemTimeProvider, TimeProvider};
pub use transaction::Transaction;
