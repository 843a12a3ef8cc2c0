// Application configuration (built once at startup, shared by reference)

use crate::error::{AppError, Result};
use serde::Deserialize;
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_RATE_LIMIT: u64 = 100;
pub const DEFAULT_RATE_WINDOW_SECONDS: u64 = 60;
pub const DEFAULT_PUBLIC_PATH: &str = "/health";
pub const DEFAULT_DATABASE_URL: &str = "sqlite://keystone.db";
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_TASK_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_TASK_BACKOFF_BASE_MS: u64 = 1000;
pub const DEFAULT_TASK_WORKERS: usize = 2;
pub const DEFAULT_TASK_POLL_INTERVAL_MS: u64 = 200;
pub const DEFAULT_SCHEDULER_TICK_MS: u64 = 1000;
pub const DEFAULT_TASK_RECOVERY_WINDOW_MS: u64 = 5 * 60 * 1000;
pub const DEFAULT_HTTP_BIND: &str = "127.0.0.1:8080";

/// Keys read as comma-separated lists from the environment
const LIST_KEYS: [&str; 2] = ["public_paths", "cors_allowed_origins"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

#[derive(Clone, PartialEq, Eq)]
pub struct AuthConfig {
    /// Shared bearer secret; `None` rejects every non-public request
    pub token: Option<String>,
    /// Exact paths, or prefixes when ending in `*`
    pub public_paths: Vec<String>,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("public_paths", &self.public_paths)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub limit: u64,
    pub window: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Redis URL; `None` selects the in-process counter store
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskConfig {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub workers: usize,
    pub poll_interval: Duration,
    pub scheduler_tick: Duration,
    pub recovery_window: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpConfig {
    pub bind: SocketAddr,
    /// `*` allows any origin
    pub cors_allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub tasks: TaskConfig,
    pub http: HttpConfig,
    pub log_format: LogFormat,
}

/// Accepts `"a,b"` as well as `["a", "b"]` (config files)
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StringList {
    One(String),
    Many(Vec<String>),
}

impl StringList {
    fn into_vec(self) -> Vec<String> {
        let items = match self {
            StringList::One(s) => s.split(',').map(str::to_string).collect(),
            StringList::Many(items) => items,
        };
        items
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// Flat view of every recognised key (environment names, lowercased)
#[derive(Debug, Default, Deserialize)]
struct RawSettings {
    auth_token: Option<String>,
    public_paths: Option<StringList>,
    rate_limit: Option<u64>,
    rate_window_seconds: Option<u64>,
    database_url: Option<String>,
    database_max_connections: Option<u32>,
    cache_url: Option<String>,
    task_max_attempts: Option<u32>,
    task_backoff_base: Option<u64>,
    task_workers: Option<usize>,
    task_poll_interval_ms: Option<u64>,
    scheduler_tick_ms: Option<u64>,
    task_recovery_window_ms: Option<u64>,
    http_bind: Option<String>,
    cors_allowed_origins: Option<StringList>,
    log_format: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn at_least_one<T: PartialOrd + From<u8> + fmt::Display>(key: &str, value: T) -> Result<T> {
    if value < T::from(1) {
        return Err(AppError::Config(format!("{key} must be >= 1, got {value}")));
    }
    Ok(value)
}

impl AppConfig {
    /// Optional file (format chosen by extension) overlaid by process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(environment(None));
        Self::build(builder)
    }

    /// Same parsing as `load`, with `vars` standing in for the environment
    pub fn from_map<K, V, I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: config::Map<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::build(config::Config::builder().add_source(environment(Some(map))))
    }

    fn build(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<Self> {
        let raw: RawSettings = builder
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| AppError::Config(e.to_string()))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawSettings) -> Result<Self> {
        let public_paths = raw
            .public_paths
            .map(StringList::into_vec)
            .unwrap_or_else(|| vec![DEFAULT_PUBLIC_PATH.to_string()]);
        let cors_allowed_origins = raw
            .cors_allowed_origins
            .map(StringList::into_vec)
            .filter(|origins| !origins.is_empty())
            .unwrap_or_else(|| vec!["*".to_string()]);

        let bind_str = non_blank(raw.http_bind).unwrap_or_else(|| DEFAULT_HTTP_BIND.to_string());
        let bind = bind_str
            .parse::<SocketAddr>()
            .map_err(|e| AppError::Config(format!("HTTP_BIND '{bind_str}' is invalid: {e}")))?;

        let log_format = match non_blank(raw.log_format).as_deref() {
            Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Self {
            auth: AuthConfig {
                token: non_blank(raw.auth_token),
                public_paths,
            },
            rate_limit: RateLimitConfig {
                limit: at_least_one("RATE_LIMIT", raw.rate_limit.unwrap_or(DEFAULT_RATE_LIMIT))?,
                window: Duration::from_secs(at_least_one(
                    "RATE_WINDOW_SECONDS",
                    raw.rate_window_seconds.unwrap_or(DEFAULT_RATE_WINDOW_SECONDS),
                )?),
            },
            database: DatabaseConfig {
                url: non_blank(raw.database_url)
                    .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
                max_connections: at_least_one(
                    "DATABASE_MAX_CONNECTIONS",
                    raw.database_max_connections
                        .unwrap_or(DEFAULT_DATABASE_MAX_CONNECTIONS),
                )?,
            },
            cache: CacheConfig {
                url: non_blank(raw.cache_url),
            },
            tasks: TaskConfig {
                max_attempts: at_least_one(
                    "TASK_MAX_ATTEMPTS",
                    raw.task_max_attempts.unwrap_or(DEFAULT_TASK_MAX_ATTEMPTS),
                )?,
                backoff_base: Duration::from_millis(
                    raw.task_backoff_base.unwrap_or(DEFAULT_TASK_BACKOFF_BASE_MS),
                ),
                workers: at_least_one(
                    "TASK_WORKERS",
                    raw.task_workers.unwrap_or(DEFAULT_TASK_WORKERS) as u64,
                )? as usize,
                poll_interval: Duration::from_millis(at_least_one(
                    "TASK_POLL_INTERVAL_MS",
                    raw.task_poll_interval_ms
                        .unwrap_or(DEFAULT_TASK_POLL_INTERVAL_MS),
                )?),
                scheduler_tick: Duration::from_millis(at_least_one(
                    "SCHEDULER_TICK_MS",
                    raw.scheduler_tick_ms.unwrap_or(DEFAULT_SCHEDULER_TICK_MS),
                )?),
                recovery_window: Duration::from_millis(
                    raw.task_recovery_window_ms
                        .unwrap_or(DEFAULT_TASK_RECOVERY_WINDOW_MS),
                ),
            },
            http: HttpConfig {
                bind,
                cors_allowed_origins,
            },
            log_format,
        })
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        // Defaults are always valid
        match Self::from_raw(RawSettings::default()) {
            Ok(config) => config,
            Err(e) => unreachable!("default configuration rejected: {e}"),
        }
    }
}

fn environment(overrides: Option<config::Map<String, String>>) -> config::Environment {
    let mut env = config::Environment::default()
        .try_parsing(true)
        .list_separator(",");
    for key in LIST_KEYS {
        env = env.with_list_parse_key(key);
    }
    env.source(overrides)
}
