//! API Error Type
//!
//! Maps application errors to HTTP statuses and envelopes. Internal errors
//! are logged with full detail; clients only see a generic message.

use crate::envelope::error_response;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use keystone_core::error::AppError;
use thiserror::Error;
use tracing::error;

pub const GENERIC_ERROR: &str = "internal server error";

#[derive(Debug, Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub AppError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0 {
            // Rendered by the validation stage from the extension
            AppError::Validation(errors) => {
                let mut response = StatusCode::BAD_REQUEST.into_response();
                response.extensions_mut().insert(errors);
                response
            }
            AppError::NotFound(m) => error_response(StatusCode::NOT_FOUND, m),
            AppError::DuplicateKey(m) => error_response(StatusCode::CONFLICT, m),
            AppError::Unauthorized(m) => error_response(StatusCode::UNAUTHORIZED, m),
            AppError::RateLimited { retry_after_secs } => {
                let mut response =
                    error_response(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded");
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
                response
            }
            AppError::InvalidState(m) => error_response(StatusCode::CONFLICT, m),
            AppError::Domain(e) => error_response(StatusCode::CONFLICT, e.to_string()),
            other => {
                error!(error = %other, "Unhandled error");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, GENERIC_ERROR)
            }
        }
    }
}
