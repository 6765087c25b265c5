//! Error types for the machine history store.

use thiserror::Error;

/// Failures surfaced by [`crate::MachineHistoryStore`].
#[derive(Error, Debug)]
pub enum HistoryError {
    /// A manual blacklist entry was requested with an empty reason.
    #[error("manual blacklist entries require a reason")]
    MissingReason,

    /// No blacklist entry exists for this `(provider, machine_id)`.
    #[error("no blacklist entry for {provider}/{machine_id}")]
    NotFound { provider: String, machine_id: String },
}
