// Not-found fallback

use super::{Next, Stage};
use crate::envelope::{error_response, Enveloped};
use async_trait::async_trait;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::Response;

/// Rewrites bare 404s (unmatched routes) into the error envelope.
/// Handler-produced 404s already carry one and pass untouched.
pub struct NotFoundStage;

#[async_trait]
impl Stage for NotFoundStage {
    fn name(&self) -> &'static str {
        "not_found"
    }

    async fn handle(&self, req: Request, next: Next<'_>) -> Response {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let response = next.run(req).await;

        if response.status() == StatusCode::NOT_FOUND
            && response.extensions().get::<Enveloped>().is_none()
        {
            return error_response(
                StatusCode::NOT_FOUND,
                format!("route not found: {method} {path}"),
            );
        }
        response
    }
}
