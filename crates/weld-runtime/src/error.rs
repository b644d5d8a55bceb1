//! Error types for the runtime crate.

use thiserror::Error;

/// Runtime execution errors.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Shape resolution, layout or allocation failure from the core crate.
    #[error(transparent)]
    Core(#[from] weld_core::Error),

    /// An input placeholder has no data bound to it.
    #[error("Input not set: {0}")]
    InputNotSet(String),

    /// Invalid tensor.
    #[error("Invalid tensor: {0}")]
    TensorError(String),

    /// Execution failed.
    #[error("Execution failed: {0}")]
    ExecutionError(String),
}

/// Specialized Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;
