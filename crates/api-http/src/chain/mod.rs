//! Middleware chain
//!
//! An explicit, ordered list of stages. Each stage gets the request and a
//! [`Next`] continuation: calling `next.run(req)` passes through, returning
//! a response short-circuits everything after it (handler included).

mod auth;
mod not_found;
mod origin;
mod rate_limit;
mod validation;

pub use auth::{AuthStage, CredentialValidator, Principal, SharedSecretValidator};
pub use not_found::NotFoundStage;
pub use origin::OriginStage;
pub use rate_limit::RateLimitStage;
pub use validation::ValidationStage;

use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::middleware;
use axum::response::Response;
use keystone_core::application::RateGuard;
use keystone_core::AppConfig;
use std::sync::Arc;

#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, req: Request, next: Next<'_>) -> Response;
}

/// The remaining stages plus the routed endpoint
pub struct Next<'a> {
    stages: &'a [Arc<dyn Stage>],
    endpoint: middleware::Next,
}

impl Next<'_> {
    pub async fn run(self, req: Request) -> Response {
        match self.stages.split_first() {
            Some((stage, rest)) => {
                stage
                    .handle(
                        req,
                        Next {
                            stages: rest,
                            endpoint: self.endpoint,
                        },
                    )
                    .await
            }
            None => self.endpoint.run(req).await,
        }
    }
}

#[derive(Clone)]
pub struct MiddlewareChain {
    stages: Arc<[Arc<dyn Stage>]>,
}

impl MiddlewareChain {
    pub fn new(stages: Vec<Arc<dyn Stage>>) -> Self {
        Self {
            stages: stages.into(),
        }
    }

    /// Origin policy, authentication, rate limiting, validation-error
    /// normalization, not-found fallback. The order is fixed.
    pub fn standard(
        config: &AppConfig,
        rate_guard: Arc<RateGuard>,
        validator: Arc<dyn CredentialValidator>,
    ) -> Self {
        Self::new(vec![
            Arc::new(OriginStage::new(&config.http.cors_allowed_origins)),
            Arc::new(AuthStage::new(validator, config.auth.public_paths.clone())),
            Arc::new(RateLimitStage::new(rate_guard)),
            Arc::new(ValidationStage),
            Arc::new(NotFoundStage),
        ])
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    pub async fn dispatch(&self, req: Request, endpoint: middleware::Next) -> Response {
        Next {
            stages: &self.stages,
            endpoint,
        }
        .run(req)
        .await
    }
}

/// Adapter for `axum::middleware::from_fn_with_state`
pub async fn run_chain(
    State(chain): State<MiddlewareChain>,
    req: Request,
    next: middleware::Next,
) -> Response {
    chain.dispatch(req, next).await
}
