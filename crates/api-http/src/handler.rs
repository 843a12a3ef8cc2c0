//! Built-in route handlers

use crate::envelope::{ApiResponse, Created};
use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::Json;
use keystone_core::application::{Submission, TaskRequest};
use keystone_core::domain::{RecurringSchedule, TaskInstance};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health() -> ApiResponse<Health> {
    ApiResponse::ok(Health {
        status: "ok",
        version: keystone_core::VERSION,
    })
}

/// POST /tasks
pub async fn submit_task(
    State(state): State<AppState>,
    Json(request): Json<TaskRequest>,
) -> Result<Created<Submission>, ApiError> {
    let submission = state.bridge.submit(request).await?;
    Ok(Created(submission))
}

/// GET /tasks/{id}
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<ApiResponse<TaskInstance>, ApiError> {
    Ok(ApiResponse::ok(state.bridge.get(&id).await?))
}

/// GET /schedules/{id}
pub async fn get_schedule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<ApiResponse<RecurringSchedule>, ApiError> {
    Ok(ApiResponse::ok(state.bridge.get_schedule(&id).await?))
}

/// DELETE /schedules/{id}: stops future enqueues, returns the disabled definition
pub async fn unschedule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<ApiResponse<RecurringSchedule>, ApiError> {
    Ok(ApiResponse::ok(state.bridge.unschedule(&id).await?))
}
