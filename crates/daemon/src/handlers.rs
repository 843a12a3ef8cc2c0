//! Handlers shipped with the binary

use keystone_core::application::{handler_fn, HandlerRegistry, TaskContext};
use tracing::info;

pub const LOG_TASK: &str = "log";

/// Writes the payload to the log; handy for smoke-testing schedules
pub fn register_builtin(registry: &mut HandlerRegistry) {
    registry.register(
        LOG_TASK,
        handler_fn(|ctx: TaskContext| async move {
            info!(
                task_id = %ctx.task_id,
                attempt = ctx.attempt,
                payload = %ctx.payload,
                "log task"
            );
            Ok(())
        }),
    );
}
