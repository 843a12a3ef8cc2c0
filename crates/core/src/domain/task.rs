// Task Domain Model

use super::error::{DomainError, Result};
use super::schedule::RecurringSchedule;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub type TaskId = String;

/// Error recorded when recovery finds a task whose worker disappeared
pub const WORKER_LOST_ERROR: &str = "worker lost";

/// Task lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Retrying,
}

impl TaskState {
    /// Terminal rows are never written again
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Pending => write!(f, "PENDING"),
            TaskState::Running => write!(f, "RUNNING"),
            TaskState::Succeeded => write!(f, "SUCCEEDED"),
            TaskState::Failed => write!(f, "FAILED"),
            TaskState::Retrying => write!(f, "RETRYING"),
        }
    }
}

impl FromStr for TaskState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(TaskState::Pending),
            "RUNNING" => Ok(TaskState::Running),
            "SUCCEEDED" => Ok(TaskState::Succeeded),
            "FAILED" => Ok(TaskState::Failed),
            "RETRYING" => Ok(TaskState::Retrying),
            other => Err(DomainError::UnknownState(other.to_string())),
        }
    }
}

/// How an instance came to exist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    Immediate,
    Recurring {
        schedule_id: String,
        expression: String,
    },
}

/// One unit of deferred work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInstance {
    pub id: TaskId,
    pub name: String,
    pub payload: serde_json::Value,
    pub schedule: Schedule,
    pub state: TaskState,

    // Retry bookkeeping; attempt_count is bumped by the claim
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub next_run_at: i64, // epoch ms
    pub last_error: Option<String>,

    pub created_at: i64,
    pub updated_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
}

impl TaskInstance {
    /// Pending instance, runnable immediately
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        payload: serde_json::Value,
        max_attempts: u32,
        now_millis: i64,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            payload,
            schedule: Schedule::Immediate,
            state: TaskState::Pending,
            attempt_count: 0,
            max_attempts,
            next_run_at: now_millis,
            last_error: None,
            created_at: now_millis,
            updated_at: now_millis,
            started_at: None,
            finished_at: None,
        }
    }

    /// Instance enqueued by a recurring definition
    pub fn from_schedule(id: impl Into<String>, schedule: &RecurringSchedule, now_millis: i64) -> Self {
        let mut task = Self::new(
            id,
            schedule.name.clone(),
            schedule.payload.clone(),
            schedule.max_attempts,
            now_millis,
        );
        task.schedule = Schedule::Recurring {
            schedule_id: schedule.id.clone(),
            expression: schedule.expression.clone(),
        };
        task
    }

    pub fn has_attempts_left(&self) -> bool {
        self.attempt_count < self.max_attempts
    }

    fn expect_running(&self, to: TaskState) -> Result<()> {
        if self.state != TaskState::Running {
            return Err(DomainError::InvalidStateTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        Ok(())
    }

    pub fn complete(&mut self, now_millis: i64) -> Result<()> {
        self.expect_running(TaskState::Succeeded)?;
        self.state = TaskState::Succeeded;
        self.last_error = None;
        self.finished_at = Some(now_millis);
        self.updated_at = now_millis;
        Ok(())
    }

    /// Park the task until `retry_at`; requires attempts left
    pub fn schedule_retry(
        &mut self,
        error: impl Into<String>,
        retry_at: i64,
        now_millis: i64,
    ) -> Result<()> {
        self.expect_running(TaskState::Retrying)?;
        if !self.has_attempts_left() {
            return Err(DomainError::AttemptsExhausted(self.id.clone()));
        }
        self.state = TaskState::Retrying;
        self.last_error = Some(error.into());
        self.next_run_at = retry_at;
        self.updated_at = now_millis;
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>, now_millis: i64) -> Result<()> {
        self.expect_running(TaskState::Failed)?;
        self.state = TaskState::Failed;
        self.last_error = Some(error.into());
        self.finished_at = Some(now_millis);
        self.updated_at = now_millis;
        Ok(())
    }
}
