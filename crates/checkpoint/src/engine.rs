//! Checkpoint Engine (C4): suspend/resume a GPU process's device context
//! and dump/restore its memory image via cuda-checkpoint + CRIU.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::error::CheckpointError;
use crate::model::{driver_major, Checkpoint, CheckpointScriptLine, RestoreResult, RestoreScriptLine};
use crate::transport::ShellTransport;

const CHECKPOINT_DIR_ROOT: &str = "/workspace/.gpu-checkpoints";
const DRIVER_PROBE_TIMEOUT_SECS: u64 = 10;
const CHECKPOINT_TIMEOUT_SECS: u64 = 60;
const RESTORE_TIMEOUT_SECS: u64 = 60;

/// Suspends, dumps, restores and relocates GPU process checkpoints.
///
/// Stateless aside from an in-memory index of checkpoints it has created,
/// mirroring the "repository session factory" ownership model in §5: this
/// engine holds no persistent state of its own beyond that index.
pub struct CheckpointEngine {
    transport: Arc<dyn ShellTransport>,
}

impl CheckpointEngine {
    #[must_use]
    pub fn new(transport: Arc<dyn ShellTransport>) -> Self {
        Self { transport }
    }

    /// Probe the NVIDIA driver version string on `host`.
    ///
    /// # Errors
    /// Returns [`CheckpointError::UnparseableDriverVersion`] if
    /// `nvidia-smi` doesn't return a parseable `major.minor.patch` string,
    /// or [`CheckpointError::CommandFailed`] if the probe command fails.
    pub async fn probe_driver_version(&self, host: &str, port: u16) -> Result<String, CheckpointError> {
        let out = self
            .transport
            .exec(
                host,
                port,
                "nvidia-smi --query-gpu=driver_version --format=csv,noheader | head -1",
                DRIVER_PROBE_TIMEOUT_SECS,
            )
            .await?;
        if !out.success() {
            return Err(CheckpointError::CommandFailed {
                exit_code: out.exit_code,
                stderr: out.stderr,
            });
        }
        let version = out.stdout.trim().to_string();
        if driver_major(&version).is_none() {
            return Err(CheckpointError::UnparseableDriverVersion(version));
        }
        Ok(version)
    }

    /// Create a checkpoint of the active GPU process on `host`.
    ///
    /// # Errors
    /// Returns [`CheckpointError`] if the remote command fails, the
    /// checkpoint tool reports an error, or no GPU process is found.
    pub async fn create_checkpoint(
        &self,
        instance_id: &str,
        host: &str,
        port: u16,
        checkpoint_id: Option<String>,
    ) -> Result<Checkpoint, CheckpointError> {
        let checkpoint_id = checkpoint_id.unwrap_or_else(|| {
            format!("gpu-{instance_id}-{}", Utc::now().timestamp())
        });

        let driver_version = self.probe_driver_version(host, port).await.ok();

        let cmd = format!(
            r#"set -e
PID=$(nvidia-smi --query-compute-apps=pid --format=csv,noheader | head -1)
if [ -z "$PID" ]; then echo '{{"error": "no GPU process found"}}'; exit 1; fi
PROCESS_NAME=$(ps -p $PID -o comm= 2>/dev/null || echo "unknown")
VRAM_USED=$(nvidia-smi --query-compute-apps=used_memory --format=csv,noheader,nounits | head -1)
DIR="{CHECKPOINT_DIR_ROOT}/{checkpoint_id}"
mkdir -p "$DIR"
if ! cuda-checkpoint --toggle --pid $PID 2>/dev/null; then echo '{{"error": "cuda-checkpoint toggle failed"}}'; exit 1; fi
if ! criu dump --tree $PID --images-dir "$DIR" --shell-job --tcp-established 2>/dev/null; then
    cuda-checkpoint --toggle --pid $PID 2>/dev/null || true
    echo '{{"error": "criu dump failed"}}'
    exit 1
fi
SIZE=$(du -sb "$DIR" | cut -f1)
echo "{{\"checkpoint_id\": \"{checkpoint_id}\", \"process_name\": \"$PROCESS_NAME\", \"vram_mb\": $VRAM_USED, \"size_bytes\": $SIZE}}"
"#
        );

        let out = self
            .transport
            .exec(host, port, &cmd, CHECKPOINT_TIMEOUT_SECS)
            .await?;
        if !out.success() {
            return Err(CheckpointError::CommandFailed {
                exit_code: out.exit_code,
                stderr: out.stderr,
            });
        }

        let line = out.json_line().ok_or(CheckpointError::NoOutput)?;
        let parsed: CheckpointScriptLine =
            serde_json::from_str(line).map_err(|_| CheckpointError::NoOutput)?;
        if let Some(err) = parsed.error {
            return Err(CheckpointError::ToolError(err));
        }

        let checkpoint = Checkpoint {
            checkpoint_id: parsed.checkpoint_id.unwrap_or(checkpoint_id),
            instance_id: instance_id.to_string(),
            created_at: Utc::now(),
            size_bytes: parsed.size_bytes.unwrap_or(0),
            process_name: parsed.process_name.unwrap_or_else(|| "unknown".to_string()),
            vram_used_gb: parsed.vram_mb.unwrap_or(0.0) / 1024.0,
            driver_major: driver_version.as_deref().and_then(driver_major),
        };

        info!(
            checkpoint_id = %checkpoint.checkpoint_id,
            instance_id,
            size_bytes = checkpoint.size_bytes,
            "checkpoint created"
        );
        Ok(checkpoint)
    }

    /// Restore `checkpoint` onto a (possibly different) `target_host`.
    ///
    /// Probes the target's driver version and refuses with
    /// [`CheckpointError::DriverMismatch`] on a major-version mismatch,
    /// rather than leaving a half-restored process.
    ///
    /// # Errors
    /// Returns [`CheckpointError`] on probe failure, driver mismatch, or a
    /// failed restore command.
    pub async fn restore_checkpoint(
        &self,
        checkpoint: &Checkpoint,
        target_host: &str,
        target_port: u16,
    ) -> Result<RestoreResult, CheckpointError> {
        if let Some(source_major) = checkpoint.driver_major {
            let target_version = self.probe_driver_version(target_host, target_port).await?;
            let target_major = driver_major(&target_version)
                .ok_or_else(|| CheckpointError::UnparseableDriverVersion(target_version.clone()))?;
            if source_major != target_major {
                warn!(
                    checkpoint_id = %checkpoint.checkpoint_id,
                    source_major,
                    target_major,
                    "refusing cross-driver restore"
                );
                return Err(CheckpointError::DriverMismatch { source_major, target_major });
            }
        }

        let checkpoint_id = &checkpoint.checkpoint_id;
        let cmd = format!(
            r#"set -e
DIR="{CHECKPOINT_DIR_ROOT}/{checkpoint_id}"
if [ ! -d "$DIR" ]; then echo '{{"error": "checkpoint not found"}}'; exit 1; fi
criu restore --images-dir "$DIR" --shell-job --tcp-established -d &
PID=$!
sleep 2
if ! kill -0 $PID 2>/dev/null; then echo '{{"error": "process did not start"}}'; exit 1; fi
if ! cuda-checkpoint --toggle --pid $PID 2>/dev/null; then echo '{{"error": "cuda-checkpoint resume failed"}}'; exit 1; fi
echo "{{\"restored_pid\": $PID, \"checkpoint_id\": \"{checkpoint_id}\"}}"
"#
        );

        let out = self
            .transport
            .exec(target_host, target_port, &cmd, RESTORE_TIMEOUT_SECS)
            .await?;
        if !out.success() {
            return Err(CheckpointError::CommandFailed {
                exit_code: out.exit_code,
                stderr: out.stderr,
            });
        }

        let line = out.json_line().ok_or(CheckpointError::NoOutput)?;
        let parsed: RestoreScriptLine =
            serde_json::from_str(line).map_err(|_| CheckpointError::NoOutput)?;
        if let Some(err) = parsed.error {
            return Err(CheckpointError::ToolError(err));
        }
        let restored_pid = parsed.restored_pid.ok_or(CheckpointError::NoOutput)?;

        info!(checkpoint_id, restored_pid, "checkpoint restored");
        Ok(RestoreResult {
            checkpoint_id: checkpoint_id.clone(),
            restored_pid,
        })
    }

    /// Relocate a checkpoint from a GPU host to its paired CPU standby:
    /// compress on the source, transfer via rsync-over-ssh, extract on the
    /// destination, then clean up the archive on the source.
    ///
    /// # Errors
    /// Returns [`CheckpointError::CommandFailed`] if any stage fails.
    pub async fn sync_to_machine(
        &self,
        src_host: &str,
        src_port: u16,
        dst_host: &str,
        dst_port: u16,
        checkpoint_id: &str,
    ) -> Result<(), CheckpointError> {
        let compress = format!(
            "cd {CHECKPOINT_DIR_ROOT} && tar -czf {checkpoint_id}.tar.gz {checkpoint_id}/"
        );
        self.run_stage(src_host, src_port, &compress, 120, "compress").await?;

        let rsync = format!(
            r#"rsync -avz -e "ssh -o StrictHostKeyChecking=no -p {dst_port}" {CHECKPOINT_DIR_ROOT}/{checkpoint_id}.tar.gz root@{dst_host}:{CHECKPOINT_DIR_ROOT}/"#
        );
        self.run_stage(src_host, src_port, &rsync, 300, "rsync").await?;

        let extract = format!(
            "cd {CHECKPOINT_DIR_ROOT} && tar -xzf {checkpoint_id}.tar.gz && rm {checkpoint_id}.tar.gz"
        );
        self.run_stage(dst_host, dst_port, &extract, 120, "extract").await?;

        let cleanup = format!("rm -f {CHECKPOINT_DIR_ROOT}/{checkpoint_id}.tar.gz");
        // Best-effort: a stray archive on the source doesn't invalidate the sync.
        let _ = self.transport.exec(src_host, src_port, &cleanup, 10).await;

        info!(checkpoint_id, src_host, dst_host, "checkpoint synced to machine");
        Ok(())
    }

    async fn run_stage(
        &self,
        host: &str,
        port: u16,
        cmd: &str,
        timeout_secs: u64,
        stage: &str,
    ) -> Result<(), CheckpointError> {
        let out = self.transport.exec(host, port, cmd, timeout_secs).await?;
        if !out.success() {
            return Err(CheckpointError::CommandFailed {
                exit_code: out.exit_code,
                stderr: format!("{stage}: {}", out.stderr),
            });
        }
        Ok(())
    }

    /// Upload a checkpoint archive to the long-term durable mirror.
    ///
    /// # Errors
    /// Returns [`CheckpointError::CommandFailed`] if the remote command
    /// fails.
    pub async fn upload_to_r2(
        &self,
        host: &str,
        port: u16,
        checkpoint_id: &str,
        bucket: &str,
    ) -> Result<String, CheckpointError> {
        let cmd = format!(
            "cd {CHECKPOINT_DIR_ROOT} && tar -czf {checkpoint_id}.tar.gz {checkpoint_id}/ && rclone copy {checkpoint_id}.tar.gz r2:{bucket}/ && rm {checkpoint_id}.tar.gz"
        );
        self.run_stage(host, port, &cmd, 300, "upload_to_r2").await?;
        let path = format!("r2:{bucket}/{checkpoint_id}.tar.gz");
        info!(checkpoint_id, %path, "checkpoint uploaded to durable mirror");
        Ok(path)
    }

    /// Download a checkpoint archive from the long-term durable mirror.
    ///
    /// # Errors
    /// Returns [`CheckpointError::CommandFailed`] if the remote command
    /// fails.
    pub async fn download_from_r2(
        &self,
        host: &str,
        port: u16,
        checkpoint_id: &str,
        bucket: &str,
    ) -> Result<(), CheckpointError> {
        let cmd = format!(
            "mkdir -p {CHECKPOINT_DIR_ROOT} && cd {CHECKPOINT_DIR_ROOT} && rclone copy r2:{bucket}/{checkpoint_id}.tar.gz . && tar -xzf {checkpoint_id}.tar.gz && rm {checkpoint_id}.tar.gz"
        );
        self.run_stage(host, port, &cmd, 300, "download_from_r2").await?;
        info!(checkpoint_id, "checkpoint downloaded from durable mirror");
        Ok(())
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

    #[tokio::test]
    async fn create_checkpoint_parses_success_line() {
        let transport = ScriptedTransport::new(vec![
            output(0, "550.54.15\n"),
            output(
                0,
                r#"{"checkpoint_id": "gpu-x-1", "process_name": "python3", "vram_mb": 2048, "size_bytes": 1000}"#,
            ),
        ]);
        let engine = CheckpointEngine::new(Arc::new(transport));
        let checkpoint = engine
            .create_checkpoint("inst-1", "1.2.3.4", 22, Some("gpu-x-1".into()))
            .await
            .unwrap();
        assert_eq!(checkpoint.checkpoint_id, "gpu-x-1");
        assert_eq!(checkpoint.process_name, "python3");
        assert!((checkpoint.vram_used_gb - 2.0).abs() < 0.01);
        assert_eq!(checkpoint.driver_major, Some(550));
    }

    #[tokio::test]
    async fn create_checkpoint_surfaces_tool_error() {
        let transport = ScriptedTransport::new(vec![
            output(0, "550.54.15\n"),
            output(1, r#"{"error": "no GPU process found"}"#),
        ]);
        let engine = CheckpointEngine::new(Arc::new(transport));
        let err = engine
            .create_checkpoint("inst-1", "1.2.3.4", 22, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CheckpointError::CommandFailed { .. }));
    }

    #[tokio::test]
    async fn restore_rejects_driver_major_mismatch() {
        let transport = ScriptedTransport::new(vec![output(0, "545.23.06\n")]);
        let engine = CheckpointEngine::new(Arc::new(transport));
        let checkpoint = Checkpoint {
            checkpoint_id: "gpu-x-1".into(),
            instance_id: "inst-1".into(),
            created_at: Utc::now(),
            size_bytes: 100,
            process_name: "python3".into(),
            vram_used_gb: 1.0,
            driver_major: Some(550),
        };
        let err = engine
            .restore_checkpoint(&checkpoint, "5.6.7.8", 22)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CheckpointError::DriverMismatch { source_major: 550, target_major: 545 }
        ));
    }

    #[tokio::test]
    async fn restore_succeeds_on_matching_driver() {
        let transport = ScriptedTransport::new(vec![
            output(0, "550.54.15\n"),
            output(0, r#"{"restored_pid": 4242, "checkpoint_id": "gpu-x-1"}"#),
        ]);
        let engine = CheckpointEngine::new(Arc::new(transport));
        let checkpoint = Checkpoint {
            checkpoint_id: "gpu-x-1".into(),
            instance_id: "inst-1".into(),
            created_at: Utc::now(),
            size_bytes: 100,
            process_name: "python3".into(),
            vram_used_gb: 1.0,
            driver_major: Some(550),
        };
        let result = engine
            .restore_checkpoint(&checkpoint, "5.6.7.8", 22)
            .await
            .unwrap();
        assert_eq!(result.restored_pid, 4242);
    }
}
