//! Engine error types

use crate::core::state::PipelineStatus;
use crate::runtime::RuntimeError;
use thiserror::Error;
use uuid::Uuid;

/// Coarse error classification reported to API callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Schema or definition errors; the pipeline is `failed` before the caller sees them
    Validation,
    /// Step failures, bad lookups, invalid transitions
    Execution,
    /// A step or group exceeded its `timeout`
    Timeout,
}

/// Error types for pipeline operations
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("validation failed: {}", .errors.join("; "))]
    Validation { errors: Vec<String> },

    #[error("'{step}' timed out after {seconds}s")]
    Timeout { step: String, seconds: f64 },

    #[error("pipeline '{0}' not found")]
    PipelineNotFound(String),

    #[error("no step or group named '{0}'")]
    NodeNotFound(String),

    #[error("cannot {action} pipeline {id}: it is {status}")]
    InvalidState {
        id: Uuid,
        action: &'static str,
        status: PipelineStatus,
    },

    #[error("unknown status '{0}'")]
    UnknownStatus(String),

    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("{0}")]
    Execution(String),
}

impl PipelineError {
    pub fn validation(error: impl Into<String>) -> Self {
        PipelineError::Validation {
            errors: vec![error.into()],
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Validation { .. } => ErrorKind::Validation,
            PipelineError::Timeout { .. } => ErrorKind::Timeout,
            _ => ErrorKind::Execution,
        }
    }
}
