// Scheduler loop: turns due recurring definitions into task instances

use super::recovery::RecoveryService;
use super::worker::ShutdownToken;
use crate::domain::{CronExpression, TaskInstance};
use crate::error::Result;
use crate::port::{IdProvider, TaskQueue, TimeProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Definitions fetched per tick
const DUE_BATCH_SIZE: u32 = 100;

/// Runs on the main runtime; never executes handlers itself
pub struct Scheduler {
    queue: Arc<dyn TaskQueue>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
    tick_interval: Duration,
    recovery: Option<PeriodicRecovery>,
}

struct PeriodicRecovery {
    service: RecoveryService,
    every_ms: i64,
}

impl Scheduler {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            queue,
            id_provider,
            time_provider,
            tick_interval,
            recovery: None,
        }
    }

    /// Also sweep orphaned RUNNING tasks every `every` while the loop runs.
    /// A zero interval disables the periodic sweep.
    pub fn with_recovery(mut self, service: RecoveryService, every: Duration) -> Self {
        if every.is_zero() {
            return self;
        }
        self.recovery = Some(PeriodicRecovery {
            service,
            every_ms: every.as_millis() as i64,
        });
        self
    }

    pub async fn run(&self, mut shutdown: ShutdownToken) {
        info!(tick_ms = self.tick_interval.as_millis() as u64, "Scheduler started");
        let mut last_sweep = self.time_provider.now_millis();
        loop {
            if shutdown.is_shutdown() {
                break;
            }
            if let Err(e) = self.tick().await {
                error!(error = %e, "Scheduler tick failed");
            }
            self.sweep_if_due(&mut last_sweep).await;
            tokio::select! {
                _ = sleep(self.tick_interval) => {},
                _ = shutdown.wait() => break,
            }
        }
        info!("Scheduler stopped");
    }

    /// Runs the recovery sweep once `every` has passed since `last_sweep`
    pub async fn sweep_if_due(&self, last_sweep: &mut i64) {
        let Some(recovery) = &self.recovery else {
            return;
        };
        let now = self.time_provider.now_millis();
        if now - *last_sweep < recovery.every_ms {
            return;
        }
        *last_sweep = now;
        if let Err(e) = recovery.service.recover_orphaned_tasks().await {
            error!(error = %e, "Periodic recovery sweep failed");
        }
    }

    /// Enqueue one instance per due definition; returns how many fired.
    ///
    /// Missed fire times collapse into a single instance: the next run is
    /// computed from now, not from the stale `next_run_at`.
    pub async fn tick(&self) -> Result<usize> {
        let now = self.time_provider.now_millis();
        let due = self.queue.due_schedules(now, DUE_BATCH_SIZE).await?;
        let mut fired = 0;

        for schedule in due {
            let next_run_at = match CronExpression::parse(&schedule.expression) {
                Ok(expression) => expression.next_after(now),
                Err(e) => {
                    warn!(schedule_id = %schedule.id, error = %e, "Disabling unparsable schedule");
                    if let Err(e) = self.queue.disable_schedule(&schedule.id, now).await {
                        error!(schedule_id = %schedule.id, error = %e, "Failed to disable schedule");
                    }
                    continue;
                }
            };

            let instance =
                TaskInstance::from_schedule(self.id_provider.generate_id(), &schedule, now);
            let applied = match self
                .queue
                .fire_schedule(&schedule.id, schedule.next_run_at, next_run_at, &instance)
                .await
            {
                Ok(applied) => applied,
                // the rest of the batch still fires; this one retries next tick
                Err(e) => {
                    error!(schedule_id = %schedule.id, error = %e, "Failed to fire schedule");
                    continue;
                }
            };

            if applied {
                fired += 1;
                debug!(
                    schedule_id = %schedule.id,
                    task_id = %instance.id,
                    next_run_at = ?next_run_at,
                    "Schedule fired"
                );
            } else {
                debug!(schedule_id = %schedule.id, "Schedule already fired elsewhere");
            }
        }
        Ok(fired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RecurringSchedule, Schedule, TaskState};
    use crate::port::id_provider::mocks::SequentialIds;
    use crate::port::task_queue::mocks::InMemoryTaskQueue;
    use crate::port::time_provider::mocks::ManualClock;
    use serde_json::json;

    // 2024-01-01T00:00:00Z
    const START: i64 = 1_704_067_200_000;

    async fn setup() -> (Scheduler, Arc<InMemoryTaskQueue>, Arc<ManualClock>) {
        let queue = Arc::new(InMemoryTaskQueue::new());
        let clock = Arc::new(ManualClock::new(START));
        let expr = CronExpression::parse("*/5 * * * *").unwrap();
        let schedule = RecurringSchedule::new("s1", "report", json!({"k": 1}), &expr, 2, START).unwrap();
        queue.insert_schedule(&schedule).await.unwrap();

        let scheduler = Scheduler::new(
            queue.clone(),
            Arc::new(SequentialIds::new("task")),
            clock.clone(),
            Duration::from_millis(10),
        );
        (scheduler, queue, clock)
    }

    #[tokio::test]
    async fn test_nothing_fires_before_due() {
        let (scheduler, queue, _) = setup().await;
        assert_eq!(scheduler.tick().await.unwrap(), 0);
        assert!(queue.tasks().is_empty());
    }

    #[tokio::test]
    async fn test_fires_once_per_due_time() {
        let (scheduler, queue, clock) = setup().await;
        clock.set(START + 5 * 60_000);

        assert_eq!(scheduler.tick().await.unwrap(), 1);
        assert_eq!(scheduler.tick().await.unwrap(), 0);

        let tasks = queue.tasks();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].state, TaskState::Pending);
        assert_eq!(tasks[0].max_attempts, 2);
        assert!(matches!(
            &tasks[0].schedule,
            Schedule::Recurring { schedule_id, .. } if schedule_id == "s1"
        ));

        let schedule = queue.find_schedule("s1").await.unwrap().unwrap();
        assert_eq!(schedule.next_run_at, START + 10 * 60_000);
        assert_eq!(schedule.last_enqueued_at, Some(START + 5 * 60_000));
    }

    #[tokio::test]
    async fn test_missed_runs_collapse() {
        let (scheduler, queue, clock) = setup().await;
        clock.set(START + 60 * 60_000 + 1);

        assert_eq!(scheduler.tick().await.unwrap(), 1);
        assert_eq!(queue.tasks().len(), 1);
        let schedule = queue.find_schedule("s1").await.unwrap().unwrap();
        assert_eq!(schedule.next_run_at, START + 65 * 60_000);
    }

    #[tokio::test]
    async fn test_disabled_schedule_never_fires() {
        let (scheduler, queue, clock) = setup().await;
        queue.disable_schedule("s1", START).await.unwrap();
        clock.set(START + 5 * 60_000);
        assert_eq!(scheduler.tick().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failing_schedule_does_not_block_batch() {
        let (scheduler, queue, clock) = setup().await;
        let expr = CronExpression::parse("*/5 * * * *").unwrap();
        let broken = RecurringSchedule::new("s0", "report", json!({}), &expr, 2, START).unwrap();
        queue.insert_schedule(&broken).await.unwrap();
        queue.break_schedule("s0");
        clock.set(START + 5 * 60_000);

        assert_eq!(scheduler.tick().await.unwrap(), 1);
        let tasks = queue.tasks();
        assert_eq!(tasks.len(), 1);
        assert!(matches!(
            &tasks[0].schedule,
            Schedule::Recurring { schedule_id, .. } if schedule_id == "s1"
        ));
    }

    #[tokio::test]
    async fn test_periodic_sweep_requeues_orphans() {
        let (scheduler, queue, clock) = setup().await;
        queue
            .enqueue(&TaskInstance::new("stuck", "report", json!({}), 3, START))
            .await
            .unwrap();
        queue.claim_next(START).await.unwrap().unwrap();

        let recovery =
            RecoveryService::new(queue.clone(), clock.clone(), Duration::from_secs(60));
        let scheduler = scheduler.with_recovery(recovery, Duration::from_secs(60));
        let mut last_sweep = START;

        clock.set(START + 30_000);
        scheduler.sweep_if_due(&mut last_sweep).await;
        assert_eq!(last_sweep, START);
        let task = queue.find_by_id("stuck").await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Running);

        clock.set(START + 61_000);
        scheduler.sweep_if_due(&mut last_sweep).await;
        assert_eq!(last_sweep, START + 61_000);
        let task = queue.find_by_id("stuck").await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Retrying);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (scheduler, _, _) = setup().await;
        let (sender, token) = crate::application::worker::shutdown_channel();
        sender.shutdown();
        tokio::time::timeout(Duration::from_secs(1), scheduler.run(token))
            .await
            .unwrap();
    }
}
