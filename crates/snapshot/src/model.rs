//! Snapshot data model.

use serde::{Deserialize, Serialize};

/// An entry in the deduplicating backup store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub short_id: String,
    /// ISO-8601-ish timestamp as reported by restic, truncated to seconds.
    pub time: String,
    pub hostname: String,
    pub tags: Vec<String>,
    pub paths: Vec<String>,
}

/// Summary returned by [`crate::SnapshotEngine::create`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub snapshot_id: String,
    pub files_new: u64,
    pub files_changed: u64,
    pub files_unmodified: u64,
    pub total_files_processed: u64,
    pub data_added: u64,
    pub total_bytes_processed: u64,
}

/// Result of [`crate::SnapshotEngine::restore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreResult {
    pub snapshot_id: String,
    pub target_path: String,
    pub files_restored: u64,
    /// Non-benign error lines surfaced from the restore output; chown
    /// failures are filtered out before this is populated.
    pub errors: Vec<String>,
}

/// Result of [`crate::SnapshotEngine::prune`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PruneResult {
    pub kept_last: u32,
    pub output: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResticSummaryLine {
    pub message_type: Option<String>,
    pub snapshot_id: Option<String>,
    #[serde(default)]
    pub files_new: u64,
    #[serde(default)]
    pub files_changed: u64,
    #[serde(default)]
    pub files_unmodified: u64,
    #[serde(default)]
    pub total_files_processed: u64,
    #[serde(default)]
    pub data_added: u64,
    #[serde(default)]
    pub total_bytes_processed: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResticSnapshotLine {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub paths: Vec<String>,
}

/// Whether a line from restore output reports a non-fatal chown failure.
///
/// Per the original provider's benign-error classification: an "error"
/// line mentioning `lchown` (ownership couldn't be restored, usually
/// because the restore ran as a non-root user) doesn't fail the restore.
#[must_use]
pub(crate) fn is_benign_restore_error(line: &str) -> bool {
    line.to_lowercase().contains("lchown")
}
