//! Scheduler error types

use thiserror::Error;
use shared::{ContextId, SharedError};

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Validation failed: {message}")]
    ValidationError { message: String },

    #[error("Persistence failed: {operation} on {path}: {message}")]
    PersistenceError {
        operation: String,
        path: String,
        message: String,
    },

    #[error("Unknown context: {context}")]
    ContextNotFound { context: ContextId },

    #[error("Context already registered: {context}")]
    ContextExists { context: ContextId },

    #[error("Shared component error: {0}")]
    SharedError(#[from] SharedError),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl SchedulerError {
    pub fn validation(message: impl Into<String>) -> Self {
        SchedulerError::ValidationError {
            message: message.into(),
        }
    }

    pub fn persistence(
        operation: impl Into<String>,
        path: impl Into<String>,
        error: impl std::fmt::Display,
    ) -> Self {
        SchedulerError::PersistenceError {
            operation: operation.into(),
            path: path.into(),
            message: error.to_string(),
        }
    }
}

/// Errors surfaced by the external membership capability
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("request timed out")]
    Timeout,

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("request rejected: {0}")]
    Rejected(String),
}

impl ClientError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Timeout | ClientError::Unavailable(_))
    }
}
