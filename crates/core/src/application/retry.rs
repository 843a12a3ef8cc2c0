// Retry policy: exponential backoff with deterministic jitter
use crate::application::handler::TaskError;
use crate::domain::TaskInstance;
use std::time::Duration;
use tracing::{info, warn};

/// Upper bound for a single backoff delay (1 hour)
pub const MAX_BACKOFF_DELAY_MS: i64 = 60 * 60 * 1000;

/// Retry decision result
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the task after the given delay in ms
    Retry(i64),
    /// Do not retry, the task has failed permanently
    Failed,
}

/// Decides whether a failed attempt is retried and when.
///
/// Backoff formula:
/// delay = base * 2^(attempt_count - 1) * (1.0 ± 0.1), capped at one hour
pub struct RetryPolicy {
    base_delay_ms: i64,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration) -> Self {
        Self {
            base_delay_ms: base_delay.as_millis().min(MAX_BACKOFF_DELAY_MS as u128) as i64,
        }
    }

    /// Only recoverable failures with attempts left are retried
    pub fn should_retry(&self, task: &TaskInstance, error: &TaskError) -> RetryDecision {
        if !error.is_recoverable() {
            return RetryDecision::Failed;
        }
        if !task.has_attempts_left() {
            warn!(
                task_id = %task.id,
                attempts = task.attempt_count,
                max_attempts = task.max_attempts,
                "Max retry attempts reached"
            );
            return RetryDecision::Failed;
        }

        let delay_ms = self.backoff_delay_ms(task);
        info!(
            task_id = %task.id,
            attempt = task.attempt_count,
            max_attempts = task.max_attempts,
            delay_ms,
            "Scheduling retry"
        );
        RetryDecision::Retry(delay_ms)
    }

    pub fn backoff_delay_ms(&self, task: &TaskInstance) -> i64 {
        let exponent = task.attempt_count.saturating_sub(1).min(30);
        let raw = self.base_delay_ms.saturating_mul(1i64 << exponent);

        // ±10% jitter seeded by the task id, so the same task always
        // backs off by the same amount
        let jitter_seed = task.id.chars().map(|c| c as u32).sum::<u32>();
        let jitter_percent = 90 + (jitter_seed % 21) as i64; // 90 to 110

        (raw.saturating_mul(jitter_percent) / 100).min(MAX_BACKOFF_DELAY_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskState;
    use serde_json::json;

    fn task(id: &str, attempt_count: u32, max_attempts: u32) -> TaskInstance {
        let mut task = TaskInstance::new(id, "x", json!({}), max_attempts, 0);
        task.state = TaskState::Running;
        task.attempt_count = attempt_count;
        task
    }

    #[test]
    fn test_backoff_doubles_within_jitter() {
        let policy = RetryPolicy::new(Duration::from_millis(1000));

        let first = policy.backoff_delay_ms(&task("abc", 1, 5));
        let second = policy.backoff_delay_ms(&task("abc", 2, 5));
        let third = policy.backoff_delay_ms(&task("abc", 3, 5));

        assert!((900..=1100).contains(&first), "{first}");
        assert!((1800..=2200).contains(&second), "{second}");
        assert!((3600..=4400).contains(&third), "{third}");
    }

    #[test]
    fn test_jitter_is_deterministic() {
        let policy = RetryPolicy::new(Duration::from_millis(1000));
        assert_eq!(
            policy.backoff_delay_ms(&task("same-id", 2, 5)),
            policy.backoff_delay_ms(&task("same-id", 2, 5))
        );
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::new(Duration::from_secs(600));
        assert_eq!(
            policy.backoff_delay_ms(&task("abc", 20, 30)),
            MAX_BACKOFF_DELAY_MS
        );
    }

    #[test]
    fn test_fatal_errors_are_not_retried() {
        let policy = RetryPolicy::new(Duration::from_millis(10));
        assert_eq!(
            policy.should_retry(&task("a", 1, 3), &TaskError::fatal("bad input")),
            RetryDecision::Failed
        );
    }

    #[test]
    fn test_exhausted_attempts_fail() {
        let policy = RetryPolicy::new(Duration::from_millis(10));
        let error = TaskError::recoverable("timeout");
        assert!(matches!(
            policy.should_retry(&task("a", 2, 3), &error),
            RetryDecision::Retry(_)
        ));
        assert_eq!(
            policy.should_retry(&task("a", 3, 3), &error),
            RetryDecision::Failed
        );
    }
}
