use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Engine error types.
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid outbound: {0}")]
    InvalidOutbound(String),

    #[error("Operation in progress: {0}")]
    OperationInProgress(&'static str),

    #[error("Process operation '{op}' timed out after {timeout_secs}s")]
    ProcessTimeout { op: &'static str, timeout_secs: u64 },

    #[error("Failed to write configuration to '{}': {source}", path.display())]
    ConfigWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Process error: {0}")]
    Process(String),

    #[error("Failed to render configuration: {0}")]
    Render(#[from] serde_json::Error),
}

impl ControlError {
    /// Shorthand for a `NotFound` error.
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Shorthand for a `Validation` error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

pub type Result<T> = std::result::Result<T, ControlError>;
