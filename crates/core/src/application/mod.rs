// Application Layer - Use Cases and Services

pub mod handler;
pub mod rate_guard;
pub mod recovery;
pub mod repository;
pub mod retry;
pub mod scheduler;
pub mod task_bridge;
pub mod worker;

// Re-exports
pub use handler::{handler_fn, FailureKind, HandlerRegistry, TaskContext, TaskError, TaskHandler};
pub use rate_guard::{RateGuard, RateStatus};
pub use recovery::RecoveryService;
pub use repository::{Repository, ScopedRepository};
pub use retry::{RetryDecision, RetryPolicy};
pub use scheduler::Scheduler;
pub use task_bridge::{Submission, SubmissionKind, TaskBridge, TaskRequest};
pub use worker::{
    shutdown_channel, DedicatedExecutor, ShutdownSender, ShutdownToken, Worker, WorkerPool,
};
