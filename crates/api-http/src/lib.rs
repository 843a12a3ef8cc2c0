//! HTTP API Layer
//!
//! Envelopes, the ordered middleware chain and the built-in task routes.
//! Domain routes are merged in by the embedding application.

pub mod chain;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod server;
pub mod state;

pub use chain::{
    CredentialValidator, MiddlewareChain, Next, Principal, SharedSecretValidator, Stage,
};
pub use envelope::{ApiResponse, Created, Enveloped, ErrorEnvelope};
pub use error::ApiError;
pub use server::{build_router, HttpServer};
pub use state::AppState;
