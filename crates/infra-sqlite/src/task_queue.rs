// SQLite TaskQueue

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use keystone_core::domain::task::{Schedule, WORKER_LOST_ERROR};
use keystone_core::domain::{RecurringSchedule, TaskInstance, TaskState};
use keystone_core::error::{AppError, Result};
use keystone_core::port::{StaleSweep, TaskQueue};
use sqlx::SqlitePool;
use tracing::{debug, warn};

const TASK_COLUMNS: &str = "id, name, payload, schedule_id, schedule_expression, state, \
     attempt_count, max_attempts, next_run_at, last_error, \
     created_at, updated_at, started_at, finished_at";

const SCHEDULE_COLUMNS: &str = "id, name, payload, expression, max_attempts, next_run_at, \
     enabled, last_enqueued_at, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    name: String,
    payload: String,
    schedule_id: Option<String>,
    schedule_expression: Option<String>,
    state: String,
    attempt_count: i64,
    max_attempts: i64,
    next_run_at: i64,
    last_error: Option<String>,
    created_at: i64,
    updated_at: i64,
    started_at: Option<i64>,
    finished_at: Option<i64>,
}

impl TaskRow {
    fn into_task(self) -> Result<TaskInstance> {
        let state: TaskState = self.state.parse()?;
        let schedule = match (self.schedule_id, self.schedule_expression) {
            (Some(schedule_id), Some(expression)) => Schedule::Recurring {
                schedule_id,
                expression,
            },
            _ => Schedule::Immediate,
        };
        Ok(TaskInstance {
            id: self.id,
            name: self.name,
            payload: serde_json::from_str(&self.payload)?,
            schedule,
            state,
            attempt_count: to_u32(self.attempt_count),
            max_attempts: to_u32(self.max_attempts),
            next_run_at: self.next_run_at,
            last_error: self.last_error,
            created_at: self.created_at,
            updated_at: self.updated_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ScheduleRow {
    id: String,
    name: String,
    payload: String,
    expression: String,
    max_attempts: i64,
    next_run_at: i64,
    enabled: bool,
    last_enqueued_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl ScheduleRow {
    fn into_schedule(self) -> Result<RecurringSchedule> {
        Ok(RecurringSchedule {
            id: self.id,
            name: self.name,
            payload: serde_json::from_str(&self.payload)?,
            expression: self.expression,
            max_attempts: to_u32(self.max_attempts),
            next_run_at: self.next_run_at,
            enabled: self.enabled,
            last_enqueued_at: self.last_enqueued_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn to_u32(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

fn schedule_columns(task: &TaskInstance) -> (Option<&str>, Option<&str>) {
    match &task.schedule {
        Schedule::Immediate => (None, None),
        Schedule::Recurring {
            schedule_id,
            expression,
        } => (Some(schedule_id.as_str()), Some(expression.as_str())),
    }
}

pub struct SqliteTaskQueue {
    pool: SqlitePool,
}

impl SqliteTaskQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn insert_task<'e, E>(executor: E, task: &TaskInstance) -> Result<()>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        let (schedule_id, schedule_expression) = schedule_columns(task);
        sqlx::query(&format!(
            "INSERT INTO tasks ({TASK_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&task.id)
        .bind(&task.name)
        .bind(task.payload.to_string())
        .bind(schedule_id)
        .bind(schedule_expression)
        .bind(task.state.to_string())
        .bind(i64::from(task.attempt_count))
        .bind(i64::from(task.max_attempts))
        .bind(task.next_run_at)
        .bind(&task.last_error)
        .bind(task.created_at)
        .bind(task.updated_at)
        .bind(task.started_at)
        .bind(task.finished_at)
        .execute(executor)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[async_trait]
impl TaskQueue for SqliteTaskQueue {
    async fn enqueue(&self, task: &TaskInstance) -> Result<()> {
        Self::insert_task(&self.pool, task).await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<TaskInstance>> {
        let row: Option<TaskRow> =
            sqlx::query_as(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        row.map(TaskRow::into_task).transpose()
    }

    async fn claim_next(&self, now_millis: i64) -> Result<Option<TaskInstance>> {
        // Single statement: the write lock is taken before the subquery
        // reads, so concurrent claimers serialize on it
        let row: Option<TaskRow> = sqlx::query_as(&format!(
            r#"
            UPDATE tasks
            SET state = 'RUNNING',
                attempt_count = attempt_count + 1,
                started_at = ?1,
                updated_at = ?1
            WHERE id = (
                SELECT id FROM tasks
                WHERE state IN ('PENDING', 'RETRYING') AND next_run_at <= ?1
                ORDER BY next_run_at ASC, seq ASC
                LIMIT 1
            )
            AND state IN ('PENDING', 'RETRYING')
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(now_millis)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(TaskRow::into_task).transpose()
    }

    async fn update(&self, task: &TaskInstance) -> Result<()> {
        // Conditional update: terminal rows are never rewritten
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET state = ?, attempt_count = ?, next_run_at = ?, last_error = ?,
                updated_at = ?, started_at = ?, finished_at = ?
            WHERE id = ?
              AND state NOT IN ('SUCCEEDED', 'FAILED')
            "#,
        )
        .bind(task.state.to_string())
        .bind(i64::from(task.attempt_count))
        .bind(task.next_run_at)
        .bind(&task.last_error)
        .bind(task.updated_at)
        .bind(task.started_at)
        .bind(task.finished_at)
        .bind(&task.id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        let current: Option<String> = sqlx::query_scalar("SELECT state FROM tasks WHERE id = ?")
            .bind(&task.id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        match current {
            None => Err(AppError::NotFound(format!("task {} not found", task.id))),
            Some(current_state) => Err(AppError::InvalidState(format!(
                "cannot move task {} from {} to {}",
                task.id, current_state, task.state
            ))),
        }
    }

    async fn count_by_state(&self, state: TaskState) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE state = ?")
            .bind(state.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn requeue_stale(&self, started_before: i64, now_millis: i64) -> Result<StaleSweep> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        // Exhausted rows go terminal first; the rest become due again now
        let failed = sqlx::query(
            r#"
            UPDATE tasks
            SET state = 'FAILED', last_error = ?, finished_at = ?, updated_at = ?
            WHERE state = 'RUNNING' AND started_at < ? AND attempt_count >= max_attempts
            "#,
        )
        .bind(WORKER_LOST_ERROR)
        .bind(now_millis)
        .bind(now_millis)
        .bind(started_before)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        .rows_affected();

        let requeued = sqlx::query(
            r#"
            UPDATE tasks
            SET state = 'RETRYING', last_error = ?, next_run_at = ?, updated_at = ?
            WHERE state = 'RUNNING' AND started_at < ?
            "#,
        )
        .bind(WORKER_LOST_ERROR)
        .bind(now_millis)
        .bind(now_millis)
        .bind(started_before)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        .rows_affected();

        tx.commit().await.map_err(map_sqlx_error)?;

        if failed + requeued > 0 {
            warn!(requeued, failed, "Recovered tasks from lost workers");
        }
        Ok(StaleSweep { requeued, failed })
    }

    async fn insert_schedule(&self, schedule: &RecurringSchedule) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO task_schedules ({SCHEDULE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&schedule.id)
        .bind(&schedule.name)
        .bind(schedule.payload.to_string())
        .bind(&schedule.expression)
        .bind(i64::from(schedule.max_attempts))
        .bind(schedule.next_run_at)
        .bind(schedule.enabled)
        .bind(schedule.last_enqueued_at)
        .bind(schedule.created_at)
        .bind(schedule.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn find_schedule(&self, id: &str) -> Result<Option<RecurringSchedule>> {
        let row: Option<ScheduleRow> = sqlx::query_as(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM task_schedules WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        row.map(ScheduleRow::into_schedule).transpose()
    }

    async fn due_schedules(&self, now_millis: i64, limit: u32) -> Result<Vec<RecurringSchedule>> {
        let rows: Vec<ScheduleRow> = sqlx::query_as(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM task_schedules \
             WHERE enabled = 1 AND next_run_at <= ? \
             ORDER BY next_run_at ASC, id ASC LIMIT ?"
        ))
        .bind(now_millis)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.into_iter().map(ScheduleRow::into_schedule).collect()
    }

    async fn fire_schedule(
        &self,
        schedule_id: &str,
        expected_next_run_at: i64,
        next_run_at: Option<i64>,
        instance: &TaskInstance,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        // Optimistic compare on next_run_at: only one tick advances a slot
        let advanced = sqlx::query(
            r#"
            UPDATE task_schedules
            SET next_run_at = COALESCE(?1, next_run_at),
                enabled = CASE WHEN ?1 IS NULL THEN 0 ELSE enabled END,
                last_enqueued_at = ?2,
                updated_at = ?2
            WHERE id = ?3 AND enabled = 1 AND next_run_at = ?4
            "#,
        )
        .bind(next_run_at)
        .bind(instance.created_at)
        .bind(schedule_id)
        .bind(expected_next_run_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        .rows_affected();

        if advanced == 0 {
            tx.rollback().await.map_err(map_sqlx_error)?;
            debug!(schedule_id, "Schedule slot already taken");
            return Ok(false);
        }

        Self::insert_task(&mut *tx, instance).await?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(true)
    }

    async fn disable_schedule(&self, id: &str, now_millis: i64) -> Result<bool> {
        let result =
            sqlx::query("UPDATE task_schedules SET enabled = 0, updated_at = ? WHERE id = ?")
                .bind(now_millis)
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }
}
