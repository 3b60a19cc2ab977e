//! Provisioning engine error types

use thiserror::Error;

/// Errors reported by a provisioning engine
///
/// The orchestrator treats every variant as an opaque per-node failure;
/// the distinction only matters for diagnostics.
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Engine not available: {0}")]
    EngineNotFound(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Command execution failed: {0}")]
    CommandFailed(String),

    #[error("No image matches filter: {0}")]
    ImageNotFound(String),

    #[error("State file error: {0}")]
    StateError(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CloudError>;
