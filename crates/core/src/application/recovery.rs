// Crash recovery: tasks left RUNNING by a worker that went away
use crate::port::{StaleSweep, TaskQueue, TimeProvider};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Crash recovery service
///
/// Requeues tasks left RUNNING by a worker that went away: on daemon
/// startup for the previous process, and periodically from the scheduler
/// loop for outcome writes that never landed. Delivery stays
/// at-least-once: a requeued task may have partially run already.
pub struct RecoveryService {
    queue: Arc<dyn TaskQueue>,
    time_provider: Arc<dyn TimeProvider>,
    recovery_window_ms: i64,
}

impl RecoveryService {
    /// Only tasks started more than `recovery_window` ago are touched
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        time_provider: Arc<dyn TimeProvider>,
        recovery_window: Duration,
    ) -> Self {
        Self {
            queue,
            time_provider,
            recovery_window_ms: recovery_window.as_millis() as i64,
        }
    }

    /// Algorithm:
    /// 1. Find RUNNING tasks with `started_at < now - recovery_window`
    /// 2. Attempts left: back to RETRYING, due immediately
    /// 3. Attempts exhausted: FAILED with "worker lost"
    pub async fn recover_orphaned_tasks(&self) -> crate::error::Result<StaleSweep> {
        let now = self.time_provider.now_millis();
        let cutoff = now - self.recovery_window_ms;

        debug!(
            cutoff_time = cutoff,
            recovery_window_ms = self.recovery_window_ms,
            "Starting orphaned task recovery"
        );

        let sweep = self.queue.requeue_stale(cutoff, now).await?;
        if sweep.requeued + sweep.failed > 0 {
            warn!(
                requeued = sweep.requeued,
                failed = sweep.failed,
                "Recovered orphaned tasks"
            );
        }
        Ok(sweep)
    }
}
