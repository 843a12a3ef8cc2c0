// Worker - Task execution loop

pub mod constants;
mod executor;
mod pool;
mod shutdown;

use constants::*;
pub use executor::DedicatedExecutor;
pub use pool::WorkerPool;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::handler::{HandlerRegistry, TaskContext, TaskError};
use crate::application::retry::{RetryDecision, RetryPolicy};
use crate::domain::TaskInstance;
use crate::error::Result;
use crate::port::{TaskQueue, TimeProvider};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Claims due tasks and runs their handlers on the runtime it is driven by
#[derive(Clone)]
pub struct Worker {
    id: usize,
    queue: Arc<dyn TaskQueue>,
    registry: Arc<HandlerRegistry>,
    retry_policy: Arc<RetryPolicy>,
    time_provider: Arc<dyn TimeProvider>,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        registry: Arc<HandlerRegistry>,
        retry_policy: Arc<RetryPolicy>,
        time_provider: Arc<dyn TimeProvider>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            id: 0,
            queue,
            registry,
            retry_policy,
            time_provider,
            poll_interval,
        }
    }

    pub fn with_id(mut self, id: usize) -> Self {
        self.id = id;
        self
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Run worker loop with graceful shutdown support
    pub async fn run(&self, mut shutdown: ShutdownToken) {
        info!(worker = self.id, "Worker started");
        loop {
            if shutdown.is_shutdown() {
                break;
            }
            match self.process_next().await {
                Ok(true) => continue,
                Ok(false) => {
                    // Nothing due, sleep briefly (or wait for shutdown)
                    tokio::select! {
                        _ = sleep(self.poll_interval) => {},
                        _ = shutdown.wait() => break,
                    }
                }
                Err(e) => {
                    error!(worker = self.id, error = %e, "Worker error");
                    tokio::select! {
                        _ = sleep(ERROR_RECOVERY_SLEEP_DURATION) => {},
                        _ = shutdown.wait() => break,
                    }
                }
            }
        }
        info!(worker = self.id, "Worker stopped");
    }

    /// Claim and execute one due task (returns true if a task was processed)
    pub async fn process_next(&self) -> Result<bool> {
        let now = self.time_provider.now_millis();
        let mut task = match self.queue.claim_next(now).await? {
            Some(task) => task,
            None => return Ok(false),
        };

        info!(
            worker = self.id,
            task_id = %task.id,
            name = %task.name,
            attempt = task.attempt_count,
            "Processing task"
        );

        let outcome = self.execute(&task).await;
        let finished_at = self.time_provider.now_millis();

        match outcome {
            Ok(()) => {
                task.complete(finished_at)?;
                info!(task_id = %task.id, "Task succeeded");
            }
            Err(err) => match self.retry_policy.should_retry(&task, &err) {
                RetryDecision::Retry(delay_ms) => {
                    warn!(
                        task_id = %task.id,
                        attempt = task.attempt_count,
                        delay_ms,
                        error = %err,
                        "Task failed, retrying"
                    );
                    task.schedule_retry(err.message, finished_at + delay_ms, finished_at)?;
                }
                RetryDecision::Failed => {
                    error!(
                        task_id = %task.id,
                        attempt = task.attempt_count,
                        error = %err,
                        "Task failed permanently"
                    );
                    task.fail(err.message, finished_at)?;
                }
            },
        }

        self.persist(&task).await?;
        Ok(true)
    }

    /// Write the outcome back, retrying transport errors so a brief lock
    /// does not strand the row in RUNNING. Whatever still fails is left for
    /// the recovery sweep.
    async fn persist(&self, task: &TaskInstance) -> Result<()> {
        let mut delay = FINISH_WRITE_BACKOFF;
        let mut attempt = 1;
        loop {
            match self.queue.update(task).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transport() && attempt < FINISH_WRITE_ATTEMPTS => {
                    warn!(
                        task_id = %task.id,
                        attempt,
                        error = %e,
                        "Task outcome write failed, retrying"
                    );
                    sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Run the handler in a spawned task so a panic only kills that task
    async fn execute(&self, task: &TaskInstance) -> std::result::Result<(), TaskError> {
        let handler = self.registry.get(&task.name).ok_or_else(|| {
            TaskError::fatal(format!("no handler registered for task '{}'", task.name))
        })?;
        let ctx = TaskContext::from(task);

        match tokio::spawn(async move { handler.handle(ctx).await }).await {
            Ok(result) => result,
            Err(join_err) if join_err.is_panic() => {
                let message = panic_message(join_err.into_panic());
                error!(task_id = %task.id, panic = %message, "Task handler panicked");
                Err(TaskError::fatal(format!("handler panicked: {message}")))
            }
            Err(join_err) => Err(TaskError::fatal(format!("handler cancelled: {join_err}"))),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::handler::handler_fn;
    use crate::domain::TaskState;
    use crate::port::task_queue::mocks::InMemoryTaskQueue;
    use crate::port::time_provider::mocks::ManualClock;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn worker_with(registry: HandlerRegistry) -> (Worker, Arc<InMemoryTaskQueue>, Arc<ManualClock>) {
        let queue = Arc::new(InMemoryTaskQueue::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let worker = Worker::new(
            queue.clone(),
            Arc::new(registry),
            Arc::new(RetryPolicy::new(Duration::from_millis(100))),
            clock.clone(),
            Duration::from_millis(5),
        );
        (worker, queue, clock)
    }

    async fn submit(queue: &InMemoryTaskQueue, name: &str, max_attempts: u32) {
        queue
            .enqueue(&TaskInstance::new("t1", name, json!({}), max_attempts, 1_000))
            .await
            .unwrap();
    }

    #[test]
    fn test_panic_message_extraction() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(7_u8)), "Unknown panic");
    }

    #[tokio::test]
    async fn test_empty_queue_processes_nothing() {
        let (worker, _, _) = worker_with(HandlerRegistry::new());
        assert!(!worker.process_next().await.unwrap());
    }

    #[tokio::test]
    async fn test_fails_twice_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let mut registry = HandlerRegistry::new();
        registry.register(
            "flaky",
            handler_fn(move |_| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(TaskError::recoverable("not yet"))
                    } else {
                        Ok(())
                    }
                }
            }),
        );
        let (worker, queue, clock) = worker_with(registry);
        submit(&queue, "flaky", 3).await;

        assert!(worker.process_next().await.unwrap());
        let task = queue.find_by_id("t1").await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Retrying);
        assert!(task.next_run_at > 1_000);

        // not due yet
        assert!(!worker.process_next().await.unwrap());

        clock.advance(Duration::from_secs(60));
        assert!(worker.process_next().await.unwrap());
        clock.advance(Duration::from_secs(60));
        assert!(worker.process_next().await.unwrap());

        let task = queue.find_by_id("t1").await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Succeeded);
        assert_eq!(task.attempt_count, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_failure_skips_retry() {
        let mut registry = HandlerRegistry::new();
        registry.register("bad", handler_fn(|_| async { Err(TaskError::fatal("bad payload")) }));
        let (worker, queue, _) = worker_with(registry);
        submit(&queue, "bad", 5).await;

        worker.process_next().await.unwrap();
        let task = queue.find_by_id("t1").await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(task.attempt_count, 1);
        assert_eq!(task.last_error.as_deref(), Some("bad payload"));
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail() {
        let mut registry = HandlerRegistry::new();
        registry.register("flaky", handler_fn(|_| async { Err(TaskError::recoverable("down")) }));
        let (worker, queue, clock) = worker_with(registry);
        submit(&queue, "flaky", 2).await;

        worker.process_next().await.unwrap();
        clock.advance(Duration::from_secs(60));
        worker.process_next().await.unwrap();

        let task = queue.find_by_id("t1").await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(task.attempt_count, 2);
    }

    #[tokio::test]
    async fn test_outcome_write_survives_transient_lock() {
        let mut registry = HandlerRegistry::new();
        registry.register("ok", handler_fn(|_| async { Ok(()) }));
        let (worker, queue, _) = worker_with(registry);
        submit(&queue, "ok", 3).await;
        queue.fail_updates(1);

        assert!(worker.process_next().await.unwrap());
        let task = queue.find_by_id("t1").await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Succeeded);
        assert_eq!(task.attempt_count, 1);
    }

    #[tokio::test]
    async fn test_outcome_write_gives_up_after_bounded_attempts() {
        let mut registry = HandlerRegistry::new();
        registry.register("ok", handler_fn(|_| async { Ok(()) }));
        let (worker, queue, _) = worker_with(registry);
        submit(&queue, "ok", 3).await;
        queue.fail_updates(FINISH_WRITE_ATTEMPTS);

        let err = worker.process_next().await.unwrap_err();
        assert!(err.is_transport());
        // left RUNNING for the recovery sweep
        let task = queue.find_by_id("t1").await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Running);
    }

    #[tokio::test]
    async fn test_panicking_handler_is_isolated() {
        let mut registry = HandlerRegistry::new();
        registry.register(
            "explode",
            handler_fn(|_| async {
                if true {
                    panic!("kaboom");
                }
                Ok(())
            }),
        );
        let (worker, queue, _) = worker_with(registry);
        submit(&queue, "explode", 3).await;

        assert!(worker.process_next().await.unwrap());
        let task = queue.find_by_id("t1").await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Failed);
        assert!(task.last_error.unwrap().contains("kaboom"));
    }

    #[tokio::test]
    async fn test_unknown_handler_fails() {
        let (worker, queue, _) = worker_with(HandlerRegistry::new());
        submit(&queue, "ghost", 3).await;

        worker.process_next().await.unwrap();
        let task = queue.find_by_id("t1").await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Failed);
    }

    #[tokio::test]
    async fn test_pool_runs_tasks_on_dedicated_threads() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let recorder = seen.clone();
        let mut registry = HandlerRegistry::new();
        registry.register(
            "record",
            handler_fn(move |_| {
                let recorder = recorder.clone();
                async move {
                    let name = std::thread::current().name().map(str::to_string);
                    recorder.lock().unwrap().push(name);
                    Ok(())
                }
            }),
        );
        let queue = Arc::new(InMemoryTaskQueue::new());
        let worker = Worker::new(
            queue.clone(),
            Arc::new(registry),
            Arc::new(RetryPolicy::new(Duration::from_millis(10))),
            Arc::new(crate::port::SystemTimeProvider),
            Duration::from_millis(5),
        );
        for i in 0..4 {
            queue
                .enqueue(&TaskInstance::new(format!("t{i}"), "record", json!({}), 1, 0))
                .await
                .unwrap();
        }

        let (sender, token) = shutdown_channel();
        let pool = WorkerPool::start(worker, 2, token).unwrap();
        assert_eq!(pool.size(), 2);

        for _ in 0..200 {
            if queue.count_by_state(TaskState::Succeeded).await.unwrap() == 4 {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        sender.shutdown();
        assert_eq!(pool.join(Duration::from_secs(5)).await, 0);

        assert_eq!(queue.count_by_state(TaskState::Succeeded).await.unwrap(), 4);
        let seen = seen.lock().unwrap();
        assert!(seen
            .iter()
            .all(|name| name.as_deref().is_some_and(|n| n.starts_with("keystone-worker-"))));
    }
}
