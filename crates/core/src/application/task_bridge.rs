// Task submission facade used by request handlers

use super::handler::HandlerRegistry;
use crate::domain::{CronExpression, RecurringSchedule, TaskInstance, TaskState};
use crate::error::{AppError, Result, ValidationErrors};
use crate::port::{IdProvider, TaskQueue, TimeProvider};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::info;

/// Hard ceiling for per-task attempts
pub const MAX_ATTEMPTS_LIMIT: u32 = 100;
const MAX_NAME_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub name: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Cron expression; absent means run once, now
    #[serde(default)]
    pub schedule: Option<String>,
    /// Falls back to the configured default
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl TaskRequest {
    pub fn immediate(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            payload,
            schedule: None,
            max_attempts: None,
        }
    }

    pub fn recurring(
        name: impl Into<String>,
        payload: serde_json::Value,
        expression: impl Into<String>,
    ) -> Self {
        Self {
            schedule: Some(expression.into()),
            ..Self::immediate(name, payload)
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionKind {
    Task,
    Schedule,
}

/// Identifier handed back to the submitter: a task id for immediate
/// submissions, a schedule id for recurring ones
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub id: String,
    pub kind: SubmissionKind,
}

pub struct TaskBridge {
    queue: Arc<dyn TaskQueue>,
    registry: Arc<HandlerRegistry>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
    default_max_attempts: u32,
}

impl TaskBridge {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        registry: Arc<HandlerRegistry>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
        default_max_attempts: u32,
    ) -> Self {
        Self {
            queue,
            registry,
            id_provider,
            time_provider,
            default_max_attempts: default_max_attempts.clamp(1, MAX_ATTEMPTS_LIMIT),
        }
    }

    /// Validate and persist a submission. Nothing runs on the caller's task.
    pub async fn submit(&self, request: TaskRequest) -> Result<Submission> {
        let mut errors = ValidationErrors::new("task submission rejected");
        let name = request.name.trim();
        if name.is_empty() {
            errors.push("name", "must not be blank");
        } else if name.len() > MAX_NAME_LEN {
            errors.push("name", format!("must be at most {MAX_NAME_LEN} characters"));
        } else if !self.registry.contains(name) {
            errors.push("name", format!("no handler registered for '{name}'"));
        }

        let max_attempts = request.max_attempts.unwrap_or(self.default_max_attempts);
        if !(1..=MAX_ATTEMPTS_LIMIT).contains(&max_attempts) {
            errors.push(
                "max_attempts",
                format!("must be between 1 and {MAX_ATTEMPTS_LIMIT}"),
            );
        }

        let expression = match request.schedule.as_deref() {
            None => None,
            Some(raw) => match CronExpression::parse(raw) {
                Ok(expression) => Some(expression),
                Err(e) => {
                    errors.push("schedule", e.to_string());
                    None
                }
            },
        };
        errors.into_result()?;

        let now = self.time_provider.now_millis();
        let id = self.id_provider.generate_id();

        match expression {
            None => {
                let task = TaskInstance::new(&id, name, request.payload, max_attempts, now);
                self.queue.enqueue(&task).await?;
                info!(task_id = %id, name, "Task submitted");
                Ok(Submission {
                    id,
                    kind: SubmissionKind::Task,
                })
            }
            Some(expression) => {
                let schedule = RecurringSchedule::new(
                    &id,
                    name,
                    request.payload,
                    &expression,
                    max_attempts,
                    now,
                )
                .ok_or_else(|| AppError::invalid_field("schedule", "expression never fires"))?;
                self.queue.insert_schedule(&schedule).await?;
                info!(
                    schedule_id = %id,
                    name,
                    expression = expression.as_str(),
                    next_run_at = schedule.next_run_at,
                    "Schedule registered"
                );
                Ok(Submission {
                    id,
                    kind: SubmissionKind::Schedule,
                })
            }
        }
    }

    pub async fn get(&self, task_id: &str) -> Result<TaskInstance> {
        self.queue
            .find_by_id(task_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("task {task_id} not found")))
    }

    pub async fn get_schedule(&self, schedule_id: &str) -> Result<RecurringSchedule> {
        self.queue
            .find_schedule(schedule_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("schedule {schedule_id} not found")))
    }

    /// Stop future enqueues. Instances already enqueued still run.
    pub async fn unschedule(&self, schedule_id: &str) -> Result<RecurringSchedule> {
        let now = self.time_provider.now_millis();
        if !self.queue.disable_schedule(schedule_id, now).await? {
            return Err(AppError::NotFound(format!(
                "schedule {schedule_id} not found"
            )));
        }
        info!(schedule_id, "Schedule disabled");
        self.get_schedule(schedule_id).await
    }

    /// Poll until the task is terminal.
    ///
    /// A task that ended FAILED surfaces as `TaskFailure`; running out of
    /// time surfaces as `InvalidState` carrying the last seen state.
    pub async fn wait_for(
        &self,
        task_id: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<TaskInstance> {
        let deadline = Instant::now() + timeout;
        loop {
            let task = self.get(task_id).await?;
            match task.state {
                TaskState::Succeeded => return Ok(task),
                TaskState::Failed => {
                    return Err(AppError::TaskFailure {
                        task_id: task.id,
                        message: task.last_error.unwrap_or_default(),
                    })
                }
                state if Instant::now() >= deadline => {
                    return Err(AppError::InvalidState(format!(
                        "task {task_id} still {state} after {}ms",
                        timeout.as_millis()
                    )))
                }
                _ => sleep(poll_interval).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::handler::handler_fn;
    use crate::port::id_provider::mocks::SequentialIds;
    use crate::port::task_queue::mocks::InMemoryTaskQueue;
    use crate::port::time_provider::mocks::ManualClock;
    use serde_json::json;

    fn bridge() -> (TaskBridge, Arc<InMemoryTaskQueue>) {
        let queue = Arc::new(InMemoryTaskQueue::new());
        let mut registry = HandlerRegistry::new();
        registry.register("send_email", handler_fn(|_| async { Ok(()) }));

        let bridge = TaskBridge::new(
            queue.clone(),
            Arc::new(registry),
            Arc::new(SequentialIds::new("id")),
            Arc::new(ManualClock::new(1_704_067_200_000)),
            3,
        );
        (bridge, queue)
    }

    #[tokio::test]
    async fn test_immediate_submission_is_pending() {
        let (bridge, _) = bridge();
        let submission = bridge
            .submit(TaskRequest::immediate("send_email", json!({"to": "a@b.c"})))
            .await
            .unwrap();
        assert_eq!(submission.kind, SubmissionKind::Task);

        let task = bridge.get(&submission.id).await.unwrap();
        assert_eq!(task.state, TaskState::Pending);
        assert_eq!(task.max_attempts, 3);
        assert_eq!(task.payload["to"], "a@b.c");
    }

    #[tokio::test]
    async fn test_recurring_submission_creates_schedule() {
        let (bridge, queue) = bridge();
        let submission = bridge
            .submit(TaskRequest::recurring("send_email", json!({}), "0 * * * *").with_max_attempts(5))
            .await
            .unwrap();
        assert_eq!(submission.kind, SubmissionKind::Schedule);
        assert!(queue.tasks().is_empty());

        let schedule = bridge.get_schedule(&submission.id).await.unwrap();
        assert_eq!(schedule.max_attempts, 5);
        assert_eq!(schedule.next_run_at, 1_704_067_200_000 + 3_600_000);
    }

    #[tokio::test]
    async fn test_validation_collects_field_errors() {
        let (bridge, _) = bridge();
        let request = TaskRequest {
            name: "unknown".into(),
            payload: json!({}),
            schedule: Some("not cron".into()),
            max_attempts: Some(0),
        };
        let err = bridge.submit(request).await.unwrap_err();
        match err {
            AppError::Validation(errors) => {
                assert!(errors.field_errors.contains_key("name"));
                assert!(errors.field_errors.contains_key("schedule"));
                assert!(errors.field_errors.contains_key("max_attempts"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unschedule() {
        let (bridge, _) = bridge();
        let submission = bridge
            .submit(TaskRequest::recurring("send_email", json!({}), "*/5 * * * *"))
            .await
            .unwrap();

        let schedule = bridge.unschedule(&submission.id).await.unwrap();
        assert!(!schedule.enabled);
        // idempotent
        assert!(bridge.unschedule(&submission.id).await.is_ok());
        assert!(matches!(
            bridge.unschedule("missing").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_wait_for_surfaces_failure() {
        let (bridge, queue) = bridge();
        let submission = bridge
            .submit(TaskRequest::immediate("send_email", json!({})))
            .await
            .unwrap();
        let mut task = queue.claim_next(i64::MAX).await.unwrap().unwrap();
        task.fail("smtp rejected", 1).unwrap();
        queue.update(&task).await.unwrap();

        let err = bridge
            .wait_for(&submission.id, Duration::from_secs(1), Duration::from_millis(5))
            .await
            .unwrap_err();
        assert!(
            matches!(err, AppError::TaskFailure { ref message, .. } if message == "smtp rejected")
        );
    }

    #[tokio::test]
    async fn test_wait_for_times_out() {
        let (bridge, _) = bridge();
        let submission = bridge
            .submit(TaskRequest::immediate("send_email", json!({})))
            .await
            .unwrap();
        let err = bridge
            .wait_for(&submission.id, Duration::from_millis(20), Duration::from_millis(5))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
    }
}
