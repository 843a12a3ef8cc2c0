//! Router assembly and the HTTP server

use crate::chain::{run_chain, MiddlewareChain};
use crate::envelope::error_response;
use crate::error::GENERIC_ERROR;
use crate::handler;
use crate::state::AppState;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{middleware, Router};
use keystone_core::error::{AppError, Result};
use std::any::Any;
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Task submission and schedule management routes
pub fn task_routes() -> Router<AppState> {
    Router::new()
        .route("/tasks", axum::routing::post(handler::submit_task))
        .route("/tasks/{id}", get(handler::get_task))
        .route(
            "/schedules/{id}",
            get(handler::get_schedule).delete(handler::unschedule),
        )
}

/// Bare 404; the not-found stage turns it into an envelope
async fn fallback() -> Response {
    StatusCode::NOT_FOUND.into_response()
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    };
    error!(panic = %detail, "Request handler panicked");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, GENERIC_ERROR)
}

/// Built-in routes plus `domain_routes`, wrapped by the chain, request
/// tracing and the panic catcher (outermost)
pub fn build_router(
    state: AppState,
    chain: MiddlewareChain,
    domain_routes: Router<AppState>,
) -> Router {
    Router::new()
        .route("/health", get(handler::health))
        .merge(task_routes())
        .merge(domain_routes)
        .fallback(fallback)
        .layer(middleware::from_fn_with_state(chain, run_chain))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(panic_response))
        .with_state(state)
}

pub struct HttpServer {
    bind: SocketAddr,
    router: Router,
}

impl HttpServer {
    pub fn new(bind: SocketAddr, router: Router) -> Self {
        Self { bind, router }
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.bind)
            .await
            .map_err(|e| AppError::Transport(format!("failed to bind {}: {e}", self.bind)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| AppError::Internal(e.to_string()))?;
        info!(addr = %local_addr, "HTTP server listening");

        axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| AppError::Internal(format!("HTTP server error: {e}")))?;

        info!("HTTP server stopped");
        Ok(())
    }
}
