//! Snapshot Engine (C3): create/list/restore/delete/prune backups via a
//! restic-compatible CLI, invoked remotely over a secure shell transport.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::SnapshotError;
use crate::model::{
    is_benign_restore_error, PruneResult, ResticSnapshotLine, ResticSummaryLine, RestoreResult,
    Snapshot, SnapshotSummary,
};
use crate::transport::ShellTransport;

const DEFAULT_CONNECTIONS: u32 = 5;
const CREATE_TIMEOUT_SECS: u64 = 3600;
const RESTORE_TIMEOUT_SECS: u64 = 1800;
const LIST_TIMEOUT_SECS: u64 = 60;
const PRUNE_TIMEOUT_SECS: u64 = 60;
const DELETE_TIMEOUT_SECS: u64 = 120;

/// Credentials for the restic repository, exported as environment on the
/// remote side rather than passed on the command line so they never leak
/// into shell history or process listings.
#[derive(Clone)]
pub struct RepositoryCredentials {
    pub repo: String,
    pub password: String,
    pub access_key: String,
    pub secret_key: String,
    pub connections: u32,
}

impl RepositoryCredentials {
    #[must_use]
    pub fn new(
        repo: impl Into<String>,
        password: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            repo: repo.into(),
            password: password.into(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            connections: DEFAULT_CONNECTIONS,
        }
    }

    fn env_prefix(&self) -> String {
        format!(
            "export AWS_ACCESS_KEY_ID='{}' && export AWS_SECRET_ACCESS_KEY='{}' && export RESTIC_PASSWORD='{}' && export RESTIC_REPOSITORY='{}' && ",
            self.access_key, self.secret_key, self.password, self.repo
        )
    }
}

/// Create/list/restore/delete/prune snapshots through a restic-compatible
/// CLI running on the remote instance.
pub struct SnapshotEngine {
    transport: Arc<dyn ShellTransport>,
    credentials: RepositoryCredentials,
}

impl SnapshotEngine {
    #[must_use]
    pub fn new(transport: Arc<dyn ShellTransport>, credentials: RepositoryCredentials) -> Self {
        Self { transport, credentials }
    }

    /// Back up `source_path` on the remote host, tagged with `tags`.
    ///
    /// # Errors
    /// Returns [`SnapshotError::CommandFailed`] if restic exits non-zero,
    /// or [`SnapshotError::UnparseableOutput`] if no `summary` JSON line is
    /// found in the output.
    pub async fn create(
        &self,
        host: &str,
        port: u16,
        source_path: &str,
        tags: &[String],
    ) -> Result<SnapshotSummary, SnapshotError> {
        let tag_args: String = tags.iter().map(|t| format!(" --tag {t}")).collect();
        let cmd = format!(
            "{}restic backup {source_path}{tag_args} -o s3.connections={} --json",
            self.credentials.env_prefix(),
            self.credentials.connections
        );

        let out = self.transport.exec(host, port, &cmd, CREATE_TIMEOUT_SECS).await?;
        if !out.success() {
            return Err(SnapshotError::CommandFailed(out.stderr));
        }

        for line in out.stdout.lines().rev() {
            let Ok(parsed) = serde_json::from_str::<ResticSummaryLine>(line) else {
                continue;
            };
            if parsed.message_type.as_deref() == Some("summary") {
                let snapshot_id = parsed.snapshot_id.unwrap_or_default();
                let short_id = snapshot_id.chars().take(8).collect();
                info!(source_path, %short_id, "snapshot created");
                return Ok(SnapshotSummary {
                    snapshot_id: short_id,
                    files_new: parsed.files_new,
                    files_changed: parsed.files_changed,
                    files_unmodified: parsed.files_unmodified,
                    total_files_processed: parsed.total_files_processed,
                    data_added: parsed.data_added,
                    total_bytes_processed: parsed.total_bytes_processed,
                });
            }
        }
        Err(SnapshotError::UnparseableOutput)
    }

    /// List snapshots, newest first. On failure, the original's behavior
    /// of returning an empty list (rather than propagating) is
    /// intentionally not followed here: callers get a typed error and
    /// decide for themselves whether an empty list is an acceptable
    /// substitute.
    ///
    /// # Errors
    /// Returns [`SnapshotError`] if the remote command fails or its output
    /// is not valid JSON.
    pub async fn list(&self, host: &str, port: u16) -> Result<Vec<Snapshot>, SnapshotError> {
        let cmd = format!("{}restic snapshots --json", self.credentials.env_prefix());
        let out = self.transport.exec(host, port, &cmd, LIST_TIMEOUT_SECS).await?;
        if !out.success() {
            return Err(SnapshotError::CommandFailed(out.stderr));
        }
        if out.stdout.trim().is_empty() {
            return Ok(Vec::new());
        }
        let raw: Vec<ResticSnapshotLine> =
            serde_json::from_str(&out.stdout).map_err(|_| SnapshotError::UnparseableOutput)?;

        let mut snapshots: Vec<Snapshot> = raw
            .into_iter()
            .map(|s| Snapshot {
                short_id: s.id.chars().take(8).collect(),
                time: s.time.chars().take(19).collect::<String>().replace('T', " "),
                id: s.id,
                hostname: s.hostname,
                tags: s.tags,
                paths: s.paths,
            })
            .collect();
        snapshots.sort_by(|a, b| b.time.cmp(&a.time));
        Ok(snapshots)
    }

    /// Restore `snapshot_id` to `target_path` on the remote host.
    ///
    /// Chown failures during restore are classified as benign and excluded
    /// from the reported errors.
    ///
    /// # Errors
    /// Returns [`SnapshotError::CommandFailed`] only when the transport
    /// itself fails; a non-zero restic exit with only benign errors still
    /// returns `Ok`.
    pub async fn restore(
        &self,
        host: &str,
        port: u16,
        snapshot_id: &str,
        target_path: &str,
        verify: bool,
    ) -> Result<RestoreResult, SnapshotError> {
        let verify_flag = if verify { " --verify" } else { "" };
        let cmd = format!(
            "{}restic restore {snapshot_id} --target {target_path} --no-owner -o s3.connections={}{verify_flag} 2>&1",
            self.credentials.env_prefix(),
            self.credentials.connections
        );

        let out = self.transport.exec(host, port, &cmd, RESTORE_TIMEOUT_SECS).await?;

        let mut files_restored = 0u64;
        let mut errors = Vec::new();
        for line in out.stdout.lines() {
            let lower = line.to_lowercase();
            if lower.contains("restoring") {
                files_restored += 1;
            }
            if lower.contains("error") && !is_benign_restore_error(line) {
                errors.push(line.trim().to_string());
            }
        }
        errors.truncate(10);

        if !out.success() && !errors.is_empty() {
            warn!(snapshot_id, count = errors.len(), "restore completed with errors");
        }

        Ok(RestoreResult {
            snapshot_id: snapshot_id.to_string(),
            target_path: target_path.to_string(),
            files_restored,
            errors,
        })
    }

    /// Delete a snapshot and prune its now-unreferenced data.
    ///
    /// # Errors
    /// Returns [`SnapshotError::CommandFailed`] if restic exits non-zero.
    pub async fn delete(&self, host: &str, port: u16, snapshot_id: &str) -> Result<(), SnapshotError> {
        let cmd = format!("{}restic forget {snapshot_id} --prune", self.credentials.env_prefix());
        let out = self.transport.exec(host, port, &cmd, DELETE_TIMEOUT_SECS).await?;
        if !out.success() {
            return Err(SnapshotError::CommandFailed(out.stderr));
        }
        info!(snapshot_id, "snapshot deleted");
        Ok(())
    }

    /// Prune the repository, keeping the `keep_last` most recent snapshots.
    ///
    /// # Errors
    /// Returns [`SnapshotError::CommandFailed`] if restic exits non-zero.
    pub async fn prune(&self, host: &str, port: u16, keep_last: u32) -> Result<PruneResult, SnapshotError> {
        let cmd = format!(
            "{}restic forget --keep-last {keep_last} --prune",
            self.credentials.env_prefix()
        );
        let out = self.transport.exec(host, port, &cmd, PRUNE_TIMEOUT_SECS).await?;
        if !out.success() {
            return Err(SnapshotError::CommandFailed(out.stderr));
        }
        Ok(PruneResult {
            kept_last: keep_last,
            output: out.stdout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::ScriptedTransport;
    use crate::transport::CommandOutput;

    fn output(code: i32, stdout: &str) -> CommandOutput {
        CommandOutput {
            exit_code: code,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    fn engine(transport: ScriptedTransport) -> SnapshotEngine {
        SnapshotEngine::new(
            Arc::new(transport),
            RepositoryCredentials::new("s3:https://example.com/bucket", "pw", "ak", "sk"),
        )
    }

    #[tokio::test]
    async fn create_parses_final_summary_line() {
        let out = output(
            0,
            "{\"message_type\": \"status\"}\n{\"message_type\": \"summary\", \"snapshot_id\": \"abcdef0123456789\", \"files_new\": 3, \"data_added\": 100}",
        );
        let engine = engine(ScriptedTransport::new(vec![out]));
        let summary = engine
            .create("1.2.3.4", 22, "/data", &["nightly".to_string()])
            .await
            .unwrap();
        assert_eq!(summary.snapshot_id, "abcdef01");
        assert_eq!(summary.files_new, 3);
        assert_eq!(summary.data_added, 100);
    }

    #[tokio::test]
    async fn create_fails_without_summary_line() {
        let out = output(0, "{\"message_type\": \"status\"}");
        let engine = engine(ScriptedTransport::new(vec![out]));
        let err = engine.create("1.2.3.4", 22, "/data", &[]).await.unwrap_err();
        assert!(matches!(err, SnapshotError::UnparseableOutput));
    }

    #[tokio::test]
    async fn list_sorts_newest_first() {
        let out = output(
            0,
            r#"[{"id": "aaa111", "time": "2024-01-01T00:00:00Z", "hostname": "h1", "tags": [], "paths": []},
               {"id": "bbb222", "time": "2024-06-01T00:00:00Z", "hostname": "h1", "tags": [], "paths": []}]"#,
        );
        let engine = engine(ScriptedTransport::new(vec![out]));
        let snapshots = engine.list("1.2.3.4", 22).await.unwrap();
        assert_eq!(snapshots[0].id, "bbb222");
        assert_eq!(snapshots[1].id, "aaa111");
    }

    #[tokio::test]
    async fn restore_excludes_lchown_errors() {
        let out = output(
            1,
            "restoring <Snapshot abc> to /data\nerror: lchown /data/foo: operation not permitted\nerror: real failure here",
        );
        let engine = engine(ScriptedTransport::new(vec![out]));
        let result = engine.restore("1.2.3.4", 22, "abc", "/data", false).await.unwrap();
        assert_eq!(result.files_restored, 1);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("real failure"));
    }
}
