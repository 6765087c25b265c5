//! Error type for the snapshot engine.

use thiserror::Error;

/// Failures surfaced by [`crate::SnapshotEngine`].
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// The remote restic invocation exited non-zero; `stderr` tail attached.
    #[error("restic command failed: {0}")]
    CommandFailed(String),

    /// The remote command produced no parseable summary line.
    #[error("could not parse restic output")]
    UnparseableOutput,

    /// The operation exceeded its configured timeout.
    #[error("{operation} timed out after {timeout_secs}s")]
    TimedOut { operation: &'static str, timeout_secs: u64 },

    #[error("transport error: {0}")]
    Transport(String),
}
