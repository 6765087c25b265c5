//! Relay-based workspace sync.
//!
//! Direct host-to-host rsync between two rented machines is not an option:
//! neither side trusts the other's host key and the control plane is the
//! only party with credentials for both. Every sync is therefore two legs
//! through a local relay directory on the control host: pull the source
//! down, then push the relay up to the destination.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tokio::time::timeout;

use crate::error::StandbyError;

/// Outcome of one leg (pull or push) of a sync round.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOutcome {
    pub bytes_transferred: u64,
}

/// One leg of a relay sync: move a workspace between a remote host and a
/// local directory on the control plane.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Pull `remote_path` on `host:port` down into `local_dir`.
    async fn pull(
        &self,
        host: &str,
        port: u16,
        remote_path: &str,
        local_dir: &Path,
        exclude: &[String],
        timeout_secs: u64,
    ) -> Result<SyncOutcome, StandbyError>;

    /// Push `local_dir` up to `remote_path` on `host:port`.
    async fn push(
        &self,
        host: &str,
        port: u16,
        local_dir: &Path,
        remote_path: &str,
        exclude: &[String],
        timeout_secs: u64,
    ) -> Result<SyncOutcome, StandbyError>;

    /// Whether `host:port` currently accepts a shell connection. Used by
    /// the standby manager while waiting for a freshly created CPU VM or
    /// recovered GPU to become reachable.
    async fn probe(&self, host: &str, port: u16, timeout_secs: u64) -> bool;
}

/// Real transport: shells out to the system `rsync` and `ssh` binaries.
pub struct RsyncTransport {
    user: String,
    connect_timeout_secs: u64,
    bytes_re: Regex,
}

impl RsyncTransport {
    #[must_use]
    pub fn new(user: impl Into<String>, connect_timeout_secs: u64) -> Self {
        Self {
            user: user.into(),
            connect_timeout_secs,
            // rsync's default summary line: "sent 1234 bytes  received 56 bytes  ..."
            bytes_re: Regex::new(r"sent ([0-9,]+) bytes\s+received ([0-9,]+) bytes")
                .expect("static regex is valid"),
        }
    }

    fn ssh_arg(&self) -> String {
        format!(
            "ssh -o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null -o ConnectTimeout={}",
            self.connect_timeout_secs
        )
    }

    fn parse_bytes(&self, stdout: &str) -> u64 {
        self.bytes_re
            .captures(stdout)
            .and_then(|c| {
                let sent: u64 = c.get(1)?.as_str().replace(',', "").parse().ok()?;
                let received: u64 = c.get(2)?.as_str().replace(',', "").parse().ok()?;
                Some(sent + received)
            })
            .unwrap_or(0)
    }

    async fn run_rsync(
        &self,
        port: u16,
        exclude: &[String],
        src: &str,
        dst: &str,
        timeout_secs: u64,
    ) -> Result<SyncOutcome, StandbyError> {
        let mut cmd = Command::new("rsync");
        cmd.arg("-az")
            .arg("--delete")
            .arg("-e")
            .arg(format!("{} -p {port}", self.ssh_arg()));
        for pattern in exclude {
            cmd.arg("--exclude").arg(pattern);
        }
        cmd.arg(src).arg(dst).kill_on_drop(true);

        let output = timeout(Duration::from_secs(timeout_secs), cmd.output())
            .await
            .map_err(|_| StandbyError::Transport(format!("rsync {src} -> {dst} timed out")))?
            .map_err(|e| StandbyError::Transport(e.to_string()))?;

        if !output.status.success() {
            return Err(StandbyError::Transport(format!(
                "rsync {src} -> {dst} exited {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(SyncOutcome {
            bytes_transferred: self.parse_bytes(&stdout),
        })
    }
}

#[async_trait]
impl SyncTransport for RsyncTransport {
    async fn pull(
        &self,
        host: &str,
        port: u16,
        remote_path: &str,
        local_dir: &Path,
        exclude: &[String],
        timeout_secs: u64,
    ) -> Result<SyncOutcome, StandbyError> {
        let src = format!("{}@{host}:{remote_path}", self.user);
        let dst = format!("{}/", local_dir.display());
        self.run_rsync(port, exclude, &src, &dst, timeout_secs).await
    }

    async fn push(
        &self,
        host: &str,
        port: u16,
        local_dir: &Path,
        remote_path: &str,
        exclude: &[String],
        timeout_secs: u64,
    ) -> Result<SyncOutcome, StandbyError> {
        let src = format!("{}/", local_dir.display());
        let dst = format!("{}@{host}:{remote_path}", self.user);
        self.run_rsync(port, exclude, &src, &dst, timeout_secs).await
    }

    async fn probe(&self, host: &str, port: u16, timeout_secs: u64) -> bool {
        let mut cmd = Command::new("ssh");
        cmd.arg("-o")
            .arg("StrictHostKeyChecking=no")
            .arg("-o")
            .arg("UserKnownHostsFile=/dev/null")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout_secs))
            .arg("-p")
            .arg(port.to_string())
            .arg(format!("{}@{host}", self.user))
            .arg("true")
            .kill_on_drop(true);

        matches!(
            timeout(Duration::from_secs(timeout_secs), cmd.output()).await,
            Ok(Ok(out)) if out.status.success()
        )
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::{SyncOutcome, SyncTransport};
    use crate::error::StandbyError;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;

    /// What a scripted leg should do.
    pub enum Leg {
        Ok(u64),
        Fail(String),
    }

    /// Scripted transport for manager tests: pulls and pushes consume
    /// queued outcomes in order; `probe` always reports ready unless
    /// explicitly configured not to.
    pub struct ScriptedTransport {
        legs: Mutex<Vec<Leg>>,
        ready: Mutex<bool>,
    }

    impl ScriptedTransport {
        pub fn new(legs: Vec<Leg>) -> Self {
            Self {
                legs: Mutex::new(legs),
                ready: Mutex::new(true),
            }
        }

        pub fn set_ready(&self, ready: bool) {
            *self.ready.lock().unwrap() = ready;
        }

        fn next(&self) -> Result<SyncOutcome, StandbyError> {
            let mut legs = self.legs.lock().unwrap();
            if legs.is_empty() {
                return Err(StandbyError::Transport("no more scripted legs".into()));
            }
            match legs.remove(0) {
                Leg::Ok(bytes) => Ok(SyncOutcome {
                    bytes_transferred: bytes,
                }),
                Leg::Fail(reason) => Err(StandbyError::Transport(reason)),
            }
        }
    }

    #[async_trait]
    impl SyncTransport for ScriptedTransport {
        async fn pull(
            &self,
            _host: &str,
            _port: u16,
            _remote_path: &str,
            _local_dir: &Path,
            _exclude: &[String],
            _timeout_secs: u64,
        ) -> Result<SyncOutcome, StandbyError> {
            self.next()
        }

        async fn push(
            &self,
            _host: &str,
            _port: u16,
            _local_dir: &Path,
            _remote_path: &str,
            _exclude: &[String],
            _timeout_secs: u64,
        ) -> Result<SyncOutcome, StandbyError> {
            self.next()
        }

        async fn probe(&self, _host: &str, _port: u16, _timeout_secs: u64) -> bool {
            *self.ready.lock().unwrap()
        }
    }
}
