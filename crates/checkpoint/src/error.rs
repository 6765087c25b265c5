//! Error type for the checkpoint engine.

use thiserror::Error;

/// Failures surfaced by [`crate::CheckpointEngine`].
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// The remote command exited non-zero; `stderr` carries whatever the
    /// tool wrote.
    #[error("remote command failed (exit {exit_code}): {stderr}")]
    CommandFailed { exit_code: i32, stderr: String },

    /// The remote side returned a JSON `{"error": "..."}` line.
    #[error("checkpoint tool reported an error: {0}")]
    ToolError(String),

    /// Neither checkpoint nor restore script produced a parseable JSON line.
    #[error("no JSON output line from remote command")]
    NoOutput,

    /// `nvidia-smi` driver probe did not return a parseable version string.
    #[error("could not parse driver version from: {0}")]
    UnparseableDriverVersion(String),

    /// Source and target driver major versions disagree; restore would not
    /// be safe. The engine refuses rather than leaving a half-restored
    /// process.
    #[error("driver major version mismatch: source {source_major} vs target {target_major}")]
    DriverMismatch { source_major: u32, target_major: u32 },

    #[error("transport error: {0}")]
    Transport(String),
}
