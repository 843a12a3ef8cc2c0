// Fixed-window per-client rate guard

use crate::config::RateLimitConfig;
use crate::error::{AppError, Result};
use crate::port::{CounterStore, TimeProvider};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Quota snapshot after an accepted request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateStatus {
    pub limit: u64,
    pub count: u64,
    pub remaining: u64,
    pub reset_after_secs: u64,
}

/// Increment-then-check limiter.
///
/// Every request is counted, including the ones it rejects, so a client
/// hammering past its limit stays limited until the window rolls over.
/// Windows are aligned to `floor(now_secs / window_secs)`, which allows
/// up to twice the limit across a window boundary.
pub struct RateGuard {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn TimeProvider>,
    limit: u64,
    window_secs: u64,
}

impl RateGuard {
    pub fn new(
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn TimeProvider>,
        config: &RateLimitConfig,
    ) -> Self {
        Self {
            store,
            clock,
            limit: config.limit.max(1),
            window_secs: config.window.as_secs().max(1),
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Counter key for `client` in the window containing `now_secs`
    pub fn window_key(&self, client: &str, now_secs: u64) -> String {
        format!("rate:{}:{}", client, now_secs / self.window_secs)
    }

    /// Record one request from `client`.
    ///
    /// Fails with `RateLimited` once the window count exceeds the limit and
    /// with `Transport` when the counter store is unreachable.
    pub async fn check(&self, client: &str) -> Result<RateStatus> {
        let now_secs = self.clock.now_millis().max(0) as u64 / 1000;
        let key = self.window_key(client, now_secs);
        let reset_after_secs = self.window_secs - now_secs % self.window_secs;

        let count = self
            .store
            .increment(&key, Duration::from_secs(self.window_secs))
            .await?;

        if count > self.limit {
            debug!(client, count, limit = self.limit, "Rate limit exceeded");
            return Err(AppError::RateLimited {
                retry_after_secs: reset_after_secs,
            });
        }

        Ok(RateStatus {
            limit: self.limit,
            count,
            remaining: self.limit - count,
            reset_after_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::counter_store::MockCounterStore;
    use crate::port::time_provider::mocks::ManualClock;
    use mockall::predicate::eq;
    use tokio_test::assert_ok;

    // 2024-01-01T00:00:00Z, aligned to any window that divides a day
    const START: i64 = 1_704_067_200_000;

    fn config(limit: u64, window_secs: u64) -> RateLimitConfig {
        RateLimitConfig {
            limit,
            window: Duration::from_secs(window_secs),
        }
    }

    #[tokio::test]
    async fn test_key_and_ttl_follow_window() {
        let mut store = MockCounterStore::new();
        store
            .expect_increment()
            .with(eq("rate:10.0.0.1:28401120"), eq(Duration::from_secs(60)))
            .times(1)
            .returning(|_, _| Ok(1));

        let clock = Arc::new(ManualClock::new(START));
        let guard = RateGuard::new(Arc::new(store), clock, &config(5, 60));

        let status = assert_ok!(guard.check("10.0.0.1").await);
        assert_eq!(status.count, 1);
        assert_eq!(status.remaining, 4);
        assert_eq!(status.reset_after_secs, 60);
    }

    #[tokio::test]
    async fn test_over_limit_is_rejected_with_retry_after() {
        let mut store = MockCounterStore::new();
        store.expect_increment().returning(|_, _| Ok(6));

        let clock = Arc::new(ManualClock::new(START + 15_000));
        let guard = RateGuard::new(Arc::new(store), clock, &config(5, 60));

        let err = guard.check("client").await.unwrap_err();
        assert!(matches!(err, AppError::RateLimited { retry_after_secs: 45 }));
    }

    #[tokio::test]
    async fn test_limit_reached_exactly_is_allowed() {
        let mut store = MockCounterStore::new();
        store.expect_increment().returning(|_, _| Ok(5));

        let guard = RateGuard::new(
            Arc::new(store),
            Arc::new(ManualClock::new(START)),
            &config(5, 60),
        );
        assert_eq!(guard.check("c").await.unwrap().remaining, 0);
    }

    #[tokio::test]
    async fn test_transport_failure_propagates() {
        let mut store = MockCounterStore::new();
        store
            .expect_increment()
            .returning(|_, _| Err(AppError::Transport("connection refused".into())));

        let guard = RateGuard::new(
            Arc::new(store),
            Arc::new(ManualClock::new(START)),
            &config(5, 60),
        );
        assert!(guard.check("c").await.unwrap_err().is_transport());
    }

    #[test]
    fn test_window_key_rolls_over() {
        let guard = RateGuard::new(
            Arc::new(MockCounterStore::new()),
            Arc::new(ManualClock::new(0)),
            &config(5, 60),
        );
        assert_eq!(guard.window_key("c", 59), "rate:c:0");
        assert_eq!(guard.window_key("c", 60), "rate:c:1");
    }
}
