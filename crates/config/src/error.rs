//! Configuration loading errors.

use thiserror::Error;

/// Errors that can occur while assembling a [`crate::FleetConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable was not set.
    #[error("missing required environment variable: {0}")]
    MissingVar(&'static str),

    /// An environment variable was set but could not be parsed.
    #[error("invalid value for {var}: {source}")]
    InvalidVar {
        var: &'static str,
        #[source]
        source: std::num::ParseIntError,
    },

    /// The optional user-facing config file could not be read or parsed.
    #[error("failed to load config file {path}: {message}")]
    ConfigFile { path: String, message: String },
}
