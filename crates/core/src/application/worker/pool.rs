// Worker pool: one OS thread + one dedicated executor per worker

use super::constants::JOIN_POLL_INTERVAL;
use super::{DedicatedExecutor, ShutdownToken, Worker};
use crate::error::{AppError, Result};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` threads, each driving a clone of `template` until
    /// `shutdown` fires
    pub fn start(template: Worker, size: usize, shutdown: ShutdownToken) -> Result<Self> {
        let mut handles = Vec::with_capacity(size);
        for index in 0..size {
            let worker = template.clone().with_id(index);
            let token = shutdown.clone();
            let name = format!("keystone-worker-{index}");

            let handle = std::thread::Builder::new()
                .name(name.clone())
                .spawn(move || {
                    let executor = match DedicatedExecutor::new(name) {
                        Ok(executor) => executor,
                        Err(e) => {
                            error!(worker = index, error = %e, "Worker executor failed to start");
                            return;
                        }
                    };
                    if let Err(e) = executor.drive(worker.run(token)) {
                        error!(worker = index, error = %e, "Worker executor refused to run");
                    }
                })
                .map_err(|e| AppError::Internal(format!("failed to spawn worker thread: {e}")))?;
            handles.push(handle);
        }

        info!(workers = size, "Worker pool started");
        Ok(Self { handles })
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every thread to exit, up to `timeout`.
    ///
    /// Returns how many threads were still running at the deadline; those
    /// are detached.
    pub async fn join(self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut pending = self.handles;

        loop {
            let (finished, running): (Vec<_>, Vec<_>) =
                pending.into_iter().partition(|handle| handle.is_finished());
            for handle in finished {
                if handle.join().is_err() {
                    error!("Worker thread panicked");
                }
            }
            pending = running;

            if pending.is_empty() {
                info!("Worker pool stopped");
                return 0;
            }
            if Instant::now() >= deadline {
                warn!(remaining = pending.len(), "Worker pool join timed out");
                return pending.len();
            }
            sleep(JOIN_POLL_INTERVAL).await;
        }
    }
}
