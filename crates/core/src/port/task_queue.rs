// Task Queue Port (Interface)

use crate::domain::{RecurringSchedule, TaskInstance, TaskState};
use crate::error::Result;
use async_trait::async_trait;

/// Outcome of a stale-running sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StaleSweep {
    /// Moved back to RETRYING
    pub requeued: u64,
    /// Attempts already exhausted, marked FAILED
    pub failed: u64,
}

/// Persistence interface for task instances and recurring definitions
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Insert a new instance
    async fn enqueue(&self, task: &TaskInstance) -> Result<()>;

    /// Find instance by ID
    async fn find_by_id(&self, id: &str) -> Result<Option<TaskInstance>>;

    /// Atomically claim the oldest due PENDING/RETRYING instance.
    ///
    /// The claimed row is RUNNING with `attempt_count` incremented and
    /// `started_at = now_millis`. Two claimers never receive the same row.
    async fn claim_next(&self, now_millis: i64) -> Result<Option<TaskInstance>>;

    /// Persist a state change. Rows already in a terminal state are
    /// refused with `InvalidState`; unknown ids with `NotFound`.
    async fn update(&self, task: &TaskInstance) -> Result<()>;

    /// Count instances by state
    async fn count_by_state(&self, state: TaskState) -> Result<i64>;

    /// Recover RUNNING instances started before `started_before`
    async fn requeue_stale(&self, started_before: i64, now_millis: i64) -> Result<StaleSweep>;

    /// Insert a recurring definition
    async fn insert_schedule(&self, schedule: &RecurringSchedule) -> Result<()>;

    /// Find definition by ID
    async fn find_schedule(&self, id: &str) -> Result<Option<RecurringSchedule>>;

    /// Enabled definitions with `next_run_at <= now_millis`, oldest first
    async fn due_schedules(&self, now_millis: i64, limit: u32) -> Result<Vec<RecurringSchedule>>;

    /// Enqueue `instance` and advance the definition in one transaction.
    ///
    /// Applies only if the stored `next_run_at` still equals
    /// `expected_next_run_at`; returns false when another tick won the race.
    /// `next_run_at = None` disables the definition.
    async fn fire_schedule(
        &self,
        schedule_id: &str,
        expected_next_run_at: i64,
        next_run_at: Option<i64>,
        instance: &TaskInstance,
    ) -> Result<bool>;

    /// Stop future enqueues. Returns false when the id is unknown.
    async fn disable_schedule(&self, id: &str, now_millis: i64) -> Result<bool>;
}

pub mod mocks {
    use super::{StaleSweep, TaskQueue};
    use crate::domain::task::WORKER_LOST_ERROR;
    use crate::domain::{RecurringSchedule, TaskInstance, TaskState};
    use crate::error::{AppError, Result};
    use async_trait::async_trait;
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Mutex-guarded queue with the same claim and guard rules as the
    /// SQLite adapter. Insertion order stands in for rowid order.
    #[derive(Default)]
    pub struct InMemoryTaskQueue {
        tasks: Mutex<Vec<TaskInstance>>,
        schedules: Mutex<BTreeMap<String, RecurringSchedule>>,
        update_failures: AtomicU32,
        broken_schedules: Mutex<BTreeSet<String>>,
    }

    impl InMemoryTaskQueue {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn tasks(&self) -> Vec<TaskInstance> {
            self.tasks.lock().map(|t| t.clone()).unwrap_or_default()
        }

        /// The next `count` calls to `update` fail with a transport error
        pub fn fail_updates(&self, count: u32) {
            self.update_failures.store(count, Ordering::SeqCst);
        }

        /// Every write touching this schedule fails with a transport error
        pub fn break_schedule(&self, id: &str) {
            if let Ok(mut broken) = self.broken_schedules.lock() {
                broken.insert(id.to_string());
            }
        }

        fn check_schedule(&self, id: &str) -> Result<()> {
            if self.broken_schedules.lock().map_err(poisoned)?.contains(id) {
                return Err(AppError::Transport(format!("schedule {id} unreachable")));
            }
            Ok(())
        }
    }

    fn poisoned<T>(_: T) -> AppError {
        AppError::Internal("in-memory queue lock poisoned".into())
    }

    #[async_trait]
    impl TaskQueue for InMemoryTaskQueue {
        async fn enqueue(&self, task: &TaskInstance) -> Result<()> {
            let mut tasks = self.tasks.lock().map_err(poisoned)?;
            if tasks.iter().any(|t| t.id == task.id) {
                return Err(AppError::DuplicateKey(task.id.clone()));
            }
            tasks.push(task.clone());
            Ok(())
        }

        async fn find_by_id(&self, id: &str) -> Result<Option<TaskInstance>> {
            let tasks = self.tasks.lock().map_err(poisoned)?;
            Ok(tasks.iter().find(|t| t.id == id).cloned())
        }

        async fn claim_next(&self, now_millis: i64) -> Result<Option<TaskInstance>> {
            let mut tasks = self.tasks.lock().map_err(poisoned)?;
            let next = tasks
                .iter_mut()
                .filter(|t| {
                    matches!(t.state, TaskState::Pending | TaskState::Retrying)
                        && t.next_run_at <= now_millis
                })
                .min_by_key(|t| t.next_run_at);
            Ok(next.map(|task| {
                task.state = TaskState::Running;
                task.attempt_count += 1;
                task.started_at = Some(now_millis);
                task.updated_at = now_millis;
                task.clone()
            }))
        }

        async fn update(&self, task: &TaskInstance) -> Result<()> {
            let pending_failure = self
                .update_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if pending_failure {
                return Err(AppError::Transport("database is locked".into()));
            }
            let mut tasks = self.tasks.lock().map_err(poisoned)?;
            let stored = tasks
                .iter_mut()
                .find(|t| t.id == task.id)
                .ok_or_else(|| AppError::NotFound(format!("task {}", task.id)))?;
            if stored.state.is_terminal() {
                return Err(AppError::InvalidState(format!(
                    "task {} is {} and cannot be modified",
                    task.id, stored.state
                )));
            }
            *stored = task.clone();
            Ok(())
        }

        async fn count_by_state(&self, state: TaskState) -> Result<i64> {
            let tasks = self.tasks.lock().map_err(poisoned)?;
            Ok(tasks.iter().filter(|t| t.state == state).count() as i64)
        }

        async fn requeue_stale(&self, started_before: i64, now_millis: i64) -> Result<StaleSweep> {
            let mut tasks = self.tasks.lock().map_err(poisoned)?;
            let mut sweep = StaleSweep::default();
            for task in tasks.iter_mut().filter(|t| {
                t.state == TaskState::Running && t.started_at.unwrap_or(0) < started_before
            }) {
                task.updated_at = now_millis;
                task.last_error = Some(WORKER_LOST_ERROR.into());
                if task.has_attempts_left() {
                    task.state = TaskState::Retrying;
                    task.next_run_at = now_millis;
                    sweep.requeued += 1;
                } else {
                    task.state = TaskState::Failed;
                    task.finished_at = Some(now_millis);
                    sweep.failed += 1;
                }
            }
            Ok(sweep)
        }

        async fn insert_schedule(&self, schedule: &RecurringSchedule) -> Result<()> {
            let mut schedules = self.schedules.lock().map_err(poisoned)?;
            if schedules.contains_key(&schedule.id) {
                return Err(AppError::DuplicateKey(schedule.id.clone()));
            }
            schedules.insert(schedule.id.clone(), schedule.clone());
            Ok(())
        }

        async fn find_schedule(&self, id: &str) -> Result<Option<RecurringSchedule>> {
            Ok(self.schedules.lock().map_err(poisoned)?.get(id).cloned())
        }

        async fn due_schedules(&self, now_millis: i64, limit: u32) -> Result<Vec<RecurringSchedule>> {
            let schedules = self.schedules.lock().map_err(poisoned)?;
            let mut due: Vec<_> = schedules
                .values()
                .filter(|s| s.is_due(now_millis))
                .cloned()
                .collect();
            due.sort_by_key(|s| s.next_run_at);
            due.truncate(limit as usize);
            Ok(due)
        }

        async fn fire_schedule(
            &self,
            schedule_id: &str,
            expected_next_run_at: i64,
            next_run_at: Option<i64>,
            instance: &TaskInstance,
        ) -> Result<bool> {
            self.check_schedule(schedule_id)?;
            let mut schedules = self.schedules.lock().map_err(poisoned)?;
            let Some(schedule) = schedules.get_mut(schedule_id) else {
                return Ok(false);
            };
            if !schedule.enabled || schedule.next_run_at != expected_next_run_at {
                return Ok(false);
            }
            match next_run_at {
                Some(next) => schedule.next_run_at = next,
                None => schedule.enabled = false,
            }
            schedule.last_enqueued_at = Some(instance.created_at);
            schedule.updated_at = instance.created_at;
            self.tasks.lock().map_err(poisoned)?.push(instance.clone());
            Ok(true)
        }

        async fn disable_schedule(&self, id: &str, now_millis: i64) -> Result<bool> {
            self.check_schedule(id)?;
            let mut schedules = self.schedules.lock().map_err(poisoned)?;
            Ok(match schedules.get_mut(id) {
                Some(schedule) => {
                    schedule.enabled = false;
                    schedule.updated_at = now_millis;
                    true
                }
                None => false,
            })
        }
    }
}
