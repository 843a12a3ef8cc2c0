// Task handlers and their registry

use crate::domain::TaskInstance;
use crate::error::AppError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// What a handler receives for one attempt
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_id: String,
    pub name: String,
    pub payload: serde_json::Value,
    /// 1-based attempt number
    pub attempt: u32,
    pub max_attempts: u32,
}

impl From<&TaskInstance> for TaskContext {
    fn from(task: &TaskInstance) -> Self {
        Self {
            task_id: task.id.clone(),
            name: task.name.clone(),
            payload: task.payload.clone(),
            attempt: task.attempt_count,
            max_attempts: task.max_attempts,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Worth another attempt (timeouts, unreachable dependencies)
    Recoverable,
    /// Retrying cannot help
    Fatal,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct TaskError {
    pub kind: FailureKind,
    pub message: String,
}

impl TaskError {
    pub fn recoverable(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Recoverable,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Fatal,
            message: message.into(),
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.kind == FailureKind::Recoverable
    }
}

/// Transport failures are retried; everything else is final
impl From<AppError> for TaskError {
    fn from(err: AppError) -> Self {
        if err.is_transport() {
            TaskError::recoverable(err.to_string())
        } else {
            TaskError::fatal(err.to_string())
        }
    }
}

#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, ctx: TaskContext) -> Result<(), TaskError>;
}

/// Adapter returned by [`handler_fn`]
pub struct FnHandler<F>(F);

/// Wrap an async closure as a handler
///
/// ```text
/// registry.register("send_email", handler_fn(|ctx| async move {
///     mailer.send(&ctx.payload).await.map_err(TaskError::from)
/// }));
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    async fn handle(&self, ctx: TaskContext) -> Result<(), TaskError> {
        (self.0)(ctx).await
    }
}

/// Task name -> handler. Built before the worker pool starts and
/// shared read-only afterwards.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any handler already registered under `name`
    pub fn register(&mut self, name: impl Into<String>, handler: impl TaskHandler + 'static) -> &mut Self {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_closure_handler_runs() {
        let mut registry = HandlerRegistry::new();
        registry.register(
            "echo",
            handler_fn(|ctx: TaskContext| async move {
                if ctx.payload["ok"] == json!(true) {
                    Ok(())
                } else {
                    Err(TaskError::fatal("not ok"))
                }
            }),
        );

        let handler = registry.get("echo").unwrap();
        let task = TaskInstance::new("t1", "echo", json!({"ok": true}), 1, 0);
        assert!(handler.handle(TaskContext::from(&task)).await.is_ok());

        let task = TaskInstance::new("t2", "echo", json!({"ok": false}), 1, 0);
        let err = handler.handle(TaskContext::from(&task)).await.unwrap_err();
        assert_eq!(err, TaskError::fatal("not ok"));
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = HandlerRegistry::new();
        registry
            .register("b", handler_fn(|_| async { Ok(()) }))
            .register("a", handler_fn(|_| async { Ok(()) }));

        assert!(registry.contains("a"));
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.names(), vec!["a", "b"]);
    }

    #[test]
    fn test_app_error_classification() {
        assert!(TaskError::from(AppError::Transport("busy".into())).is_recoverable());
        assert!(!TaskError::from(AppError::NotFound("x".into())).is_recoverable());
    }
}
