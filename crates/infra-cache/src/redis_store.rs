// Redis-backed counters shared across processes

use async_trait::async_trait;
use keystone_core::error::{AppError, Result};
use keystone_core::port::CounterStore;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError, Script};
use std::time::Duration;
use tracing::info;

/// Atomic increment; the TTL is set only when the key is created.
///
/// KEYS[1] = counter key, ARGV[1] = ttl in milliseconds.
/// Returns: the post-increment value.
const LUA_INCREMENT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], tonumber(ARGV[1]))
end
return count
"#;

/// Connection and I/O failures mean the store is unreachable; everything
/// else is a server-side error
pub fn map_redis_error(err: RedisError, key: &str) -> AppError {
    if err.is_io_error()
        || err.is_connection_refusal()
        || err.is_connection_dropped()
        || err.is_timeout()
    {
        AppError::Transport(format!("Redis unreachable for key {key}: {err}"))
    } else {
        AppError::Internal(format!("Redis error for key {key}: {err}"))
    }
}

#[derive(Clone)]
pub struct RedisCounterStore {
    conn: ConnectionManager,
    script: Script,
}

impl RedisCounterStore {
    /// Connect eagerly so a bad URL fails at startup
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)
            .map_err(|e| AppError::Config(format!("invalid CACHE_URL: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| map_redis_error(e, "<connect>"))?;
        info!("Redis counter store connected");
        Ok(Self {
            conn,
            script: Script::new(LUA_INCREMENT),
        })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64> {
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let count: u64 = self
            .script
            .key(key)
            .arg(ttl_ms)
            .invoke_async(&mut self.conn.clone())
            .await
            .map_err(|e| map_redis_error(e, key))?;
        Ok(count)
    }
}
