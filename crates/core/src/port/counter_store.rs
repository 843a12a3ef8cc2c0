// Counter Store Port (Interface)

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Shared expiring counters used by the rate guard
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically add one to `key` and return the new value.
    ///
    /// The first increment creates the key with `ttl`; later increments
    /// leave the expiry untouched. Unreachable backends fail with
    /// `AppError::Transport`.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64>;
}
