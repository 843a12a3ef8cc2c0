// Bearer-token authentication

use super::{Next, Stage};
use crate::error::ApiError;
use async_trait::async_trait;
use axum::extract::Request;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use keystone_core::error::{AppError, Result};
use std::sync::Arc;
use tracing::debug;

/// Authenticated caller, attached to request extensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub subject: String,
}

/// Credential check; issuing credentials is someone else's job
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialValidator: Send + Sync {
    /// `Unauthorized` when the token is not acceptable
    async fn validate(&self, token: &str) -> Result<Principal>;
}

/// Compares against one configured secret. With no secret configured,
/// nothing validates.
pub struct SharedSecretValidator {
    secret: Option<String>,
}

impl SharedSecretValidator {
    pub const SUBJECT: &'static str = "shared-secret";

    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
        }
    }
}

/// Runtime independent of where the first mismatch is (length still leaks)
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[async_trait]
impl CredentialValidator for SharedSecretValidator {
    async fn validate(&self, token: &str) -> Result<Principal> {
        match &self.secret {
            Some(secret) if constant_time_eq(secret.as_bytes(), token.as_bytes()) => {
                Ok(Principal {
                    subject: Self::SUBJECT.to_string(),
                })
            }
            Some(_) => Err(AppError::Unauthorized("invalid credential".into())),
            None => Err(AppError::Unauthorized("authentication is not configured".into())),
        }
    }
}

pub struct AuthStage {
    validator: Arc<dyn CredentialValidator>,
    public_paths: Vec<String>,
}

impl AuthStage {
    pub fn new(validator: Arc<dyn CredentialValidator>, public_paths: Vec<String>) -> Self {
        Self {
            validator,
            public_paths,
        }
    }

    /// Exact match, or prefix match for entries ending in `*`
    pub fn is_public(&self, path: &str) -> bool {
        self.public_paths.iter().any(|entry| match entry.strip_suffix('*') {
            Some(prefix) => path.starts_with(prefix),
            None => path == entry,
        })
    }
}

fn bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[async_trait]
impl Stage for AuthStage {
    fn name(&self) -> &'static str {
        "auth"
    }

    async fn handle(&self, mut req: Request, next: Next<'_>) -> Response {
        if self.is_public(req.uri().path()) {
            return next.run(req).await;
        }

        let Some(token) = bearer_token(&req) else {
            debug!(path = %req.uri().path(), "Missing credential");
            return ApiError(AppError::Unauthorized("missing bearer token".into())).into_response();
        };

        let outcome = self.validator.validate(token).await;
        match outcome {
            Ok(principal) => {
                req.extensions_mut().insert(principal);
                next.run(req).await
            }
            Err(err) => {
                debug!(path = %req.uri().path(), error = %err, "Credential rejected");
                ApiError(err).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shared_secret() {
        let validator = SharedSecretValidator::new(Some("s3cret".into()));
        assert_eq!(
            validator.validate("s3cret").await.unwrap().subject,
            SharedSecretValidator::SUBJECT
        );
        assert!(matches!(
            validator.validate("s3cres").await,
            Err(AppError::Unauthorized(_))
        ));
        assert!(validator.validate("s3").await.is_err());
    }

    #[tokio::test]
    async fn test_unconfigured_secret_rejects_everything() {
        let validator = SharedSecretValidator::new(Some(String::new()));
        assert!(validator.validate("").await.is_err());
        assert!(validator.validate("anything").await.is_err());
    }

    #[test]
    fn test_public_path_matching() {
        let stage = AuthStage::new(
            Arc::new(MockCredentialValidator::new()),
            vec!["/health".into(), "/public/*".into()],
        );
        assert!(stage.is_public("/health"));
        assert!(!stage.is_public("/health/deep"));
        assert!(stage.is_public("/public/docs"));
        assert!(!stage.is_public("/tasks"));
    }
}
