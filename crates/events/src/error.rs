//! Error types for event dispatch.

use thiserror::Error;

/// Errors that can occur when recording an event through a sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The sink is not configured (e.g. missing endpoint).
    #[error("sink not configured: {0}")]
    NotConfigured(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}
