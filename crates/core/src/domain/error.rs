// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid task state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Invalid schedule expression '{expression}': {reason}")]
    InvalidSchedule { expression: String, reason: String },

    #[error("Unknown task state: {0}")]
    UnknownState(String),

    #[error("Retry budget exhausted for task {0}")]
    AttemptsExhausted(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
