// Worker constants (no magic values)
use std::time::Duration;

/// Sleep duration after worker error before retry (1s)
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(1);

/// Default recovery window for orphaned tasks (5 minutes)
pub const DEFAULT_RECOVERY_WINDOW_MS: i64 = 5 * 60 * 1000;

/// How often the pool checks whether worker threads have exited
pub const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Attempts at persisting a finished task before giving up on it
pub const FINISH_WRITE_ATTEMPTS: u32 = 5;

/// First delay between finish-write attempts; doubles each time
pub const FINISH_WRITE_BACKOFF: Duration = Duration::from_millis(50);
