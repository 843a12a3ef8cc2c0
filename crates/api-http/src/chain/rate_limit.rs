// Per-client rate limiting

use super::auth::Principal;
use super::{Next, Stage};
use crate::error::ApiError;
use async_trait::async_trait;
use axum::extract::{ConnectInfo, Request};
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};
use keystone_core::application::RateGuard;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::warn;

pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const ANONYMOUS_CLIENT: &str = "anonymous";

pub struct RateLimitStage {
    guard: Arc<RateGuard>,
}

impl RateLimitStage {
    pub fn new(guard: Arc<RateGuard>) -> Self {
        Self { guard }
    }
}

/// Peer IP when known, then the authenticated subject, then `anonymous`
pub fn client_identity(req: &Request) -> String {
    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }
    if let Some(principal) = req.extensions().get::<Principal>() {
        return principal.subject.clone();
    }
    ANONYMOUS_CLIENT.to_string()
}

#[async_trait]
impl Stage for RateLimitStage {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn handle(&self, req: Request, next: Next<'_>) -> Response {
        let client = client_identity(&req);
        match self.guard.check(&client).await {
            Ok(status) => {
                let mut response = next.run(req).await;
                let headers = response.headers_mut();
                headers.insert(LIMIT_HEADER, HeaderValue::from(status.limit));
                headers.insert(REMAINING_HEADER, HeaderValue::from(status.remaining));
                response
            }
            Err(err) if err.is_transport() => {
                // Fail open while the counter store is unreachable
                warn!(client = %client, error = %err, "Rate guard unavailable, allowing request");
                next.run(req).await
            }
            Err(err) => ApiError(err).into_response(),
        }
    }
}
