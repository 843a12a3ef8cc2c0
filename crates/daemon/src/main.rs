//! Keystone - Main Entry Point
//!
//! Composition root: config, logging, storage, rate guard, middleware chain,
//! task bridge (scheduler + worker pool) and the HTTP server.

mod handlers;
mod telemetry;

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use keystone_api_http::{build_router, AppState, HttpServer, MiddlewareChain, SharedSecretValidator};
use keystone_core::application::{
    shutdown_channel, HandlerRegistry, RateGuard, RecoveryService, RetryPolicy, Scheduler,
    TaskBridge, Worker, WorkerPool,
};
use keystone_core::config::LogFormat;
use keystone_core::port::{
    CounterStore, IdProvider, SystemTimeProvider, TaskQueue, TimeProvider, UuidProvider,
};
use keystone_core::{AppConfig, VERSION};
use keystone_infra_cache::{MemoryCounterStore, RedisCounterStore};
use keystone_infra_sqlite::{create_pool, run_migrations, SqliteTaskQueue};

const CONFIG_PATH_VAR: &str = "KEYSTONE_CONFIG";
const DEFAULT_LOG_FILTER: &str = "keystone=info";
const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(10);
const SCHEDULER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

fn init_logging(format: LogFormat) -> Result<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_FILTER))
        .context("invalid log filter")?;
    let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());

    // Built before the subscriber exists; failures are reported once it does
    let (otel_layer, otel_error) = match telemetry::layer() {
        Ok(layer) => (layer, None),
        Err(e) => (None, Some(e)),
    };
    let otel_enabled = otel_layer.is_some();

    let registry = tracing_subscriber::registry()
        .with(otel_layer)
        .with(env_filter);
    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(writer))
            .init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().pretty().with_writer(writer))
            .init(),
    }

    if let Some(e) = otel_error {
        warn!(error = ?e, "Failed to initialize OpenTelemetry (continuing without it)");
    } else if otel_enabled {
        info!("OpenTelemetry export enabled");
    } else if telemetry::requested() {
        warn!("OTLP endpoint set but the 'telemetry' feature is not compiled in");
    }
    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Configuration (env + optional file), immutable from here on
    let config_path = std::env::var_os(CONFIG_PATH_VAR).map(PathBuf::from);
    let config = AppConfig::load(config_path.as_deref()).context("loading configuration")?;

    // 2. Logging
    let _log_guard = init_logging(config.log_format)?;
    info!(version = VERSION, "Keystone starting");

    // 3. Database
    let pool = create_pool(&config.database.url, config.database.max_connections)
        .await
        .context("creating database pool")?;
    let applied = run_migrations(&pool).await.context("running migrations")?;
    info!(applied = ?applied, "Database ready");

    // 4. DI wiring
    let clock: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let ids: Arc<dyn IdProvider> = Arc::new(UuidProvider);
    let queue: Arc<dyn TaskQueue> = Arc::new(SqliteTaskQueue::new(pool.clone()));

    let counters: Arc<dyn CounterStore> = match &config.cache.url {
        Some(url) => Arc::new(
            RedisCounterStore::connect(url)
                .await
                .context("connecting to cache")?,
        ),
        None => {
            info!("CACHE_URL not set, using in-process rate counters");
            Arc::new(MemoryCounterStore::new(clock.clone()))
        }
    };
    let rate_guard = Arc::new(RateGuard::new(counters, clock.clone(), &config.rate_limit));

    if config.auth.token.is_none() {
        warn!("AUTH_TOKEN not set: every non-public request will be rejected");
    }
    let validator = Arc::new(SharedSecretValidator::new(config.auth.token.clone()));
    let chain = MiddlewareChain::standard(&config, rate_guard, validator);

    let mut registry = HandlerRegistry::new();
    handlers::register_builtin(&mut registry);
    let registry = Arc::new(registry);
    info!(handlers = ?registry.names(), "Task handlers registered");

    // 5. Crash recovery: reclaim tasks whose worker died mid-run
    let recovery = RecoveryService::new(queue.clone(), clock.clone(), config.tasks.recovery_window);
    match recovery.recover_orphaned_tasks().await {
        Ok(sweep) => info!(
            requeued = sweep.requeued,
            failed = sweep.failed,
            "Crash recovery completed"
        ),
        Err(e) => error!(error = %e, "Crash recovery failed"),
    }

    // 6. Scheduler loop (main runtime) and worker pool (dedicated threads)
    let (shutdown_tx, shutdown_token) = shutdown_channel();

    let scheduler = Scheduler::new(
        queue.clone(),
        ids.clone(),
        clock.clone(),
        config.tasks.scheduler_tick,
    )
    .with_recovery(
        RecoveryService::new(queue.clone(), clock.clone(), config.tasks.recovery_window),
        config.tasks.recovery_window,
    );
    let scheduler_token = shutdown_token.clone();
    let scheduler_handle = tokio::spawn(async move { scheduler.run(scheduler_token).await });

    let worker = Worker::new(
        queue.clone(),
        registry.clone(),
        Arc::new(RetryPolicy::new(config.tasks.backoff_base)),
        clock.clone(),
        config.tasks.poll_interval,
    );
    let workers = WorkerPool::start(worker, config.tasks.workers, shutdown_token.clone())
        .context("starting worker pool")?;

    // 7. HTTP server
    let bridge = Arc::new(TaskBridge::new(
        queue,
        registry,
        ids,
        clock,
        config.tasks.max_attempts,
    ));
    let router = build_router(AppState::new(bridge), chain, axum::Router::new());
    let server = HttpServer::new(config.http.bind, router);
    let mut server_token = shutdown_token.clone();
    let mut server_handle =
        tokio::spawn(server.serve(async move { server_token.wait().await }));

    info!("System ready. Press Ctrl+C to shut down");

    // 8. Wait for Ctrl+C, or for the server to stop on its own
    let early_exit = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for shutdown signal")?;
            info!("Shutdown signal received");
            None
        }
        joined = &mut server_handle => Some(joined),
    };

    // 9. Graceful shutdown: drain HTTP, stop the scheduler, join workers
    shutdown_tx.shutdown();
    let served = match early_exit {
        Some(joined) => joined,
        None => server_handle.await,
    };
    if tokio::time::timeout(SCHEDULER_STOP_TIMEOUT, scheduler_handle)
        .await
        .is_err()
    {
        warn!("Scheduler did not stop in time");
    }
    let stuck = workers.join(WORKER_JOIN_TIMEOUT).await;
    if stuck > 0 {
        warn!(stuck, "Some workers were still running at exit");
    }
    pool.close().await;
    telemetry::shutdown();

    served
        .context("HTTP server task panicked")?
        .context("HTTP server failed")?;
    info!("Shutdown complete");
    Ok(())
}
