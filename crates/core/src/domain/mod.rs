// Domain Layer - Pure business logic and entities

pub mod error;
pub mod filter;
pub mod record;
pub mod schedule;
pub mod task;

// Re-exports
pub use error::DomainError;
pub use filter::{Comparison, Condition, Direction, Filter, OrderBy, Visibility, META_FIELDS};
pub use record::{Document, Entity, NewRecord, Patch, Record, RecordId};
pub use schedule::{CronExpression, RecurringSchedule};
pub use task::{Schedule, TaskId, TaskInstance, TaskState, WORKER_LOST_ERROR};
