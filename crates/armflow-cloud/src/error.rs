//! Cloud engine error types

use std::time::Duration;
use thiserror::Error;

/// Whether the orchestrator should re-invoke the failed operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient; retrying later may succeed
    Recoverable,
    /// Surfaced to the operator; retrying will not help
    NonRecoverable,
}

/// Cloud engine errors
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Provider error ({status}): {message}")]
    Provider { status: u16, message: String },

    #[error("Bad request ({status}): {body}")]
    BadRequest { status: u16, body: String },

    #[error("Conflict ({status}): {body}")]
    Conflict { status: u16, body: String },

    #[error("Operation failed: {0}")]
    OperationFailed(String),

    #[error("Missing poll location in {status} response")]
    MissingPollLocation { status: u16 },

    #[error("Unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("Resource not yet visible: {0}")]
    NotYetVisible(String),

    #[error("Can't use non-existing resource: {0}")]
    ExternalResourceMissing(String),

    #[error("Name space exhausted for {kind} after {attempts} attempts")]
    NameExhausted { kind: String, attempts: u32 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    /// Classify the error for the orchestrator
    pub fn class(&self) -> ErrorClass {
        match self {
            CloudError::BadRequest { .. }
            | CloudError::Conflict { .. }
            | CloudError::OperationFailed(_)
            | CloudError::ExternalResourceMissing(_)
            | CloudError::NameExhausted { .. }
            | CloudError::InvalidConfig(_)
            | CloudError::StateError(_)
            | CloudError::Json(_) => ErrorClass::NonRecoverable,
            CloudError::Provider { status, .. } => match status {
                400 | 401 | 403 | 409 | 422 => ErrorClass::NonRecoverable,
                _ => ErrorClass::Recoverable,
            },
            CloudError::MissingPollLocation { .. }
            | CloudError::UnexpectedStatus { .. }
            | CloudError::NotYetVisible(_)
            | CloudError::Timeout(_)
            | CloudError::Transport(_)
            | CloudError::Io(_) => ErrorClass::Recoverable,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.class() == ErrorClass::Recoverable
    }

    /// HTTP status reported by the provider, if the error came from one
    pub fn status(&self) -> Option<u16> {
        match self {
            CloudError::Provider { status, .. }
            | CloudError::BadRequest { status, .. }
            | CloudError::Conflict { status, .. }
            | CloudError::MissingPollLocation { status }
            | CloudError::UnexpectedStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Suggested wait before the orchestrator retries a recoverable failure
    pub fn retry_after(&self, default: Duration) -> Option<Duration> {
        match self.class() {
            ErrorClass::Recoverable => Some(default),
            ErrorClass::NonRecoverable => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
