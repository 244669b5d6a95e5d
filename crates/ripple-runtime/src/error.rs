//! Runtime error types.

use thiserror::Error;

use ripple_core::CoreError;

use crate::config::ConfigError;

/// Errors that can occur during runtime operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// An inbound frame could not be turned into an event.
    #[error("dropped inbound frame: {0}")]
    Ingest(#[from] CoreError),

    /// The runtime no longer accepts events.
    #[error("runtime is shutting down")]
    ShuttingDown,
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
