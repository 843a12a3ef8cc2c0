// Keystone Core - Domain Logic & Ports
// NO infrastructure dependencies (hexagonal: adapters live in infra-* crates)

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod port;

pub use config::AppConfig;
pub use error::{AppError, Result, ValidationErrors};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
