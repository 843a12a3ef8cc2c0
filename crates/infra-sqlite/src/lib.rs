// Keystone Infrastructure - SQLite Adapter
// Implements: DocumentStore, DocumentTransaction, TaskQueue

mod connection;
mod document_store;
mod error;
mod migration;
mod sql;
mod task_queue;
mod transaction;

pub use connection::create_pool;
pub use document_store::SqliteDocumentStore;
pub use error::map_sqlx_error;
pub use migration::{core_migrations, run_migrations, Migration, MigrationRunner};
pub use task_queue::SqliteTaskQueue;
pub use transaction::SqliteDocumentTransaction;

// Re-export so callers do not need a direct sqlx dependency for the pool type
pub use sqlx::SqlitePool;

// Note: sqlx::Error conversion is handled by `map_sqlx_error`
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for AppError here)
