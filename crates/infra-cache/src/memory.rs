// In-process counters for single-node deployments and tests

use async_trait::async_trait;
use dashmap::DashMap;
use keystone_core::error::Result;
use keystone_core::port::{CounterStore, TimeProvider};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Expired entries are swept every this many increments
const PURGE_EVERY: u64 = 1024;

#[derive(Debug, Clone, Copy)]
struct Counter {
    count: u64,
    expires_at: i64,
}

/// Counts are exact within one process only
pub struct MemoryCounterStore {
    counters: DashMap<String, Counter>,
    clock: Arc<dyn TimeProvider>,
    ops: AtomicU64,
}

impl MemoryCounterStore {
    pub fn new(clock: Arc<dyn TimeProvider>) -> Self {
        Self {
            counters: DashMap::new(),
            clock,
            ops: AtomicU64::new(0),
        }
    }

    /// Drop expired counters, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let before = self.counters.len();
        self.counters.retain(|_, counter| counter.expires_at > now);
        let removed = before.saturating_sub(self.counters.len());
        if removed > 0 {
            debug!(removed, "Purged expired counters");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64> {
        let now = self.clock.now_millis();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);

        let count = {
            let mut entry = self.counters.entry(key.to_string()).or_insert(Counter {
                count: 0,
                expires_at: now.saturating_add(ttl_ms),
            });
            if entry.expires_at <= now {
                *entry = Counter {
                    count: 0,
                    expires_at: now.saturating_add(ttl_ms),
                };
            }
            entry.count += 1;
            entry.count
        };

        if self.ops.fetch_add(1, Ordering::Relaxed) % PURGE_EVERY == PURGE_EVERY - 1 {
            self.purge_expired();
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_core::port::time_provider::mocks::ManualClock;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_counts_per_key() {
        let store = MemoryCounterStore::new(Arc::new(ManualClock::new(0)));
        let ttl = Duration::from_secs(60);
        assert_eq!(store.increment("a", ttl).await.unwrap(), 1);
        assert_eq!(store.increment("a", ttl).await.unwrap(), 2);
        assert_eq!(store.increment("b", ttl).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_expired_counter_restarts() {
        let clock = Arc::new(ManualClock::new(0));
        let store = MemoryCounterStore::new(clock.clone());
        let ttl = Duration::from_secs(60);
        store.increment("a", ttl).await.unwrap();
        store.increment("a", ttl).await.unwrap();

        clock.advance(Duration::from_secs(60));
        assert_eq!(store.increment("a", ttl).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_purge_removes_only_expired() {
        let clock = Arc::new(ManualClock::new(0));
        let store = MemoryCounterStore::new(clock.clone());
        assert_ok!(store.increment("short", Duration::from_secs(1)).await);
        assert_ok!(store.increment("long", Duration::from_secs(120)).await);

        clock.advance(Duration::from_secs(2));
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_exact() {
        let store = Arc::new(MemoryCounterStore::new(Arc::new(ManualClock::new(0))));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    store.increment("k", Duration::from_secs(60)).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.increment("k", Duration::from_secs(60)).await.unwrap(), 401);
    }
}
