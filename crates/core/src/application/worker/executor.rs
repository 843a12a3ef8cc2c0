// Dedicated single-threaded executor owned by one worker thread

use crate::error::{AppError, Result};
use std::future::Future;
use tokio::runtime::{Builder, Handle, Runtime};

/// Current-thread tokio runtime bound to the OS thread that drives it.
///
/// Never shared: each worker thread builds its own, so a slow or blocking
/// handler cannot stall the scheduler or another worker.
pub struct DedicatedExecutor {
    label: String,
    runtime: Runtime,
}

impl DedicatedExecutor {
    pub fn new(label: impl Into<String>) -> Result<Self> {
        let label = label.into();
        let runtime = Builder::new_current_thread()
            .enable_all()
            .thread_name(label.clone())
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build runtime {label}: {e}")))?;
        Ok(Self { label, runtime })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Block the calling thread until `future` completes.
    ///
    /// Refuses to run from inside another runtime, where blocking would
    /// stall that runtime's scheduler.
    pub fn drive<F: Future>(&self, future: F) -> Result<F::Output> {
        if Handle::try_current().is_ok() {
            return Err(AppError::InvalidState(format!(
                "executor {} cannot be driven from inside an async context",
                self.label
            )));
        }
        Ok(self.runtime.block_on(future))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drive_runs_future_to_completion() {
        let executor = DedicatedExecutor::new("test-exec").unwrap();
        let value = executor
            .drive(async {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                tokio::spawn(async { 40 }).await.unwrap() + 2
            })
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(executor.label(), "test-exec");
    }

    #[tokio::test]
    async fn test_drive_inside_runtime_is_refused() {
        let executor = DedicatedExecutor::new("nested").unwrap();
        assert!(matches!(
            executor.drive(async {}),
            Err(AppError::InvalidState(_))
        ));
        // A runtime cannot be dropped from an async context
        std::thread::spawn(move || drop(executor)).join().unwrap();
    }
}
