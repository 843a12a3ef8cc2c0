// Origin policy (CORS)

use super::{Next, Stage};
use crate::envelope::error_response;
use async_trait::async_trait;
use axum::extract::Request;
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::debug;

const ALLOWED_METHODS: &str = "GET, POST, PUT, PATCH, DELETE, OPTIONS";
const DEFAULT_ALLOWED_HEADERS: &str = "authorization, content-type";
const PREFLIGHT_MAX_AGE_SECS: &str = "600";

pub struct OriginStage {
    any: bool,
    allowed: Vec<String>,
}

impl OriginStage {
    /// `*` anywhere in the list allows every origin
    pub fn new(origins: &[String]) -> Self {
        Self {
            any: origins.iter().any(|o| o == "*"),
            allowed: origins
                .iter()
                .map(|o| o.trim_end_matches('/').to_string())
                .collect(),
        }
    }

    fn allows(&self, origin: &str) -> bool {
        self.any || self.allowed.iter().any(|allowed| allowed == origin)
    }
}

fn allow_origin(response: &mut Response, origin: HeaderValue) {
    let headers = response.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    headers.append(header::VARY, HeaderValue::from_static("Origin"));
}

#[async_trait]
impl Stage for OriginStage {
    fn name(&self) -> &'static str {
        "origin"
    }

    async fn handle(&self, req: Request, next: Next<'_>) -> Response {
        let Some(origin) = req.headers().get(header::ORIGIN).cloned() else {
            return next.run(req).await;
        };
        let allowed = origin.to_str().map(|o| self.allows(o)).unwrap_or(false);
        let preflight = req.method() == Method::OPTIONS
            && req
                .headers()
                .contains_key(header::ACCESS_CONTROL_REQUEST_METHOD);

        if preflight {
            if !allowed {
                debug!(origin = ?origin, "Preflight from disallowed origin");
                return error_response(StatusCode::FORBIDDEN, "origin not allowed");
            }
            let requested_headers = req
                .headers()
                .get(header::ACCESS_CONTROL_REQUEST_HEADERS)
                .cloned()
                .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_ALLOWED_HEADERS));

            let mut response = StatusCode::NO_CONTENT.into_response();
            allow_origin(&mut response, origin);
            let headers = response.headers_mut();
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static(ALLOWED_METHODS),
            );
            headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, requested_headers);
            headers.insert(
                header::ACCESS_CONTROL_MAX_AGE,
                HeaderValue::from_static(PREFLIGHT_MAX_AGE_SECS),
            );
            return response;
        }

        // Disallowed simple requests get no CORS headers; the browser blocks them
        let mut response = next.run(req).await;
        if allowed {
            allow_origin(&mut response, origin);
        }
        response
    }
}
