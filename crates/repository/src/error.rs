//! Error taxonomy for the repository layer.

use thiserror::Error;

/// Plays the role of the original's `RepositoryException`: every
/// implementation of [`crate::UserRepo`], [`crate::ServerlessRepo`] and
/// [`crate::MachineHistoryRepo`] raises this, leaving the caller to decide
/// whether to recover locally (idempotent writes) or surface the error.
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("{kind} with id {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} with id {id} already exists")]
    Conflict { kind: &'static str, id: String },

    #[error("invalid {kind}: {reason}")]
    Invalid { kind: &'static str, reason: String },
}
