//! Checkpoint data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A durable artifact referencing a suspended GPU process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_id: String,
    pub instance_id: String,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub process_name: String,
    pub vram_used_gb: f64,
    pub driver_major: Option<u32>,
}

/// Outcome of [`crate::CheckpointEngine::restore_checkpoint`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreResult {
    pub checkpoint_id: String,
    pub restored_pid: u32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CheckpointScriptLine {
    pub error: Option<String>,
    pub checkpoint_id: Option<String>,
    pub process_name: Option<String>,
    pub vram_mb: Option<f64>,
    pub size_bytes: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RestoreScriptLine {
    pub error: Option<String>,
    pub restored_pid: Option<u32>,
}

/// Extract the major component of a driver version string like `550.54.15`.
pub(crate) fn driver_major(version: &str) -> Option<u32> {
    version.split('.').next()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_major_parses_dotted_version() {
        assert_eq!(driver_major("550.54.15"), Some(550));
        assert_eq!(driver_major("545"), Some(545));
        assert_eq!(driver_major("not-a-version"), None);
    }
}
