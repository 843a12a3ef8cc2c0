//! Response envelopes
//!
//! Success: `{success: true, data}`. Failure: `{success: false, error, field_errors?}`.
//! Every enveloped response carries the [`Enveloped`] extension so later
//! stages can tell it apart from bare framework responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use keystone_core::error::ValidationErrors;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Marker extension: the body is already an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Enveloped;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        enveloped(StatusCode::OK, Json(self))
    }
}

/// 201 with the success envelope
#[derive(Debug, Clone)]
pub struct Created<T>(pub T);

impl<T: Serialize> IntoResponse for Created<T> {
    fn into_response(self) -> Response {
        enveloped(StatusCode::CREATED, Json(ApiResponse::ok(self.0)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_errors: Option<BTreeMap<String, Vec<String>>>,
}

impl ErrorEnvelope {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            field_errors: None,
        }
    }
}

fn enveloped(status: StatusCode, body: impl IntoResponse) -> Response {
    let mut response = (status, body).into_response();
    response.extensions_mut().insert(Enveloped);
    response
}

pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    enveloped(status, Json(ErrorEnvelope::new(message)))
}

/// 400 with per-field messages
pub fn validation_response(errors: &ValidationErrors) -> Response {
    let envelope = ErrorEnvelope {
        success: false,
        error: errors.message.clone(),
        field_errors: Some(errors.field_errors.clone()),
    };
    enveloped(StatusCode::BAD_REQUEST, Json(envelope))
}
