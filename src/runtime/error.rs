//! Runtime executor errors

use thiserror::Error;

/// Error types for runtime operations
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime used before init")]
    NotInitialized,

    #[error("runtime already initialized for pipeline {0}")]
    AlreadyInitialized(String),

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("step '{step}' exited with code {code}: {message}")]
    StepFailed {
        step: String,
        code: i32,
        message: String,
    },

    #[error("timeout after {0} seconds")]
    Timeout(u64),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RuntimeError {
    /// Exit code carried by a step failure
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            RuntimeError::StepFailed { code, .. } => Some(*code),
            _ => None,
        }
    }
}
