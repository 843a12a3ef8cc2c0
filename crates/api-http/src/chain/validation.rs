// Validation-error normalization

use super::{Next, Stage};
use crate::envelope::{validation_response, Enveloped};
use async_trait::async_trait;
use axum::body::to_bytes;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::Response;
use keystone_core::error::ValidationErrors;

/// Extractor rejections are short plain-text messages
const REJECTION_BODY_LIMIT: usize = 16 * 1024;

fn is_rejection_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_REQUEST | StatusCode::UNSUPPORTED_MEDIA_TYPE | StatusCode::UNPROCESSABLE_ENTITY
    )
}

/// Turns handler validation failures (signalled by a `ValidationErrors`
/// response extension) and bare extractor rejections into the 400 envelope
pub struct ValidationStage;

#[async_trait]
impl Stage for ValidationStage {
    fn name(&self) -> &'static str {
        "validation"
    }

    async fn handle(&self, req: Request, next: Next<'_>) -> Response {
        let response = next.run(req).await;

        if let Some(errors) = response.extensions().get::<ValidationErrors>() {
            return validation_response(errors);
        }
        if !is_rejection_status(response.status())
            || response.extensions().get::<Enveloped>().is_some()
        {
            return response;
        }

        let message = match to_bytes(response.into_body(), REJECTION_BODY_LIMIT).await {
            Ok(bytes) if !bytes.is_empty() => String::from_utf8_lossy(&bytes).into_owned(),
            _ => "invalid request".to_string(),
        };
        let mut errors = ValidationErrors::new(message.clone());
        errors.push("body", message);
        validation_response(&errors)
    }
}
