//! Remote command execution over a secure shell transport.
//!
//! Every checkpoint operation runs on the instance itself, never locally —
//! the VRAM and the CRIU dump both live on the remote host.

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;

use crate::error::CheckpointError;

/// Result of a single remote command invocation.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// The last line of stdout starting with `{`, if any — every script in
    /// this crate emits exactly one JSON summary line on its last line of
    /// output.
    #[must_use]
    pub fn json_line(&self) -> Option<&str> {
        self.stdout.lines().rev().find(|l| l.trim_start().starts_with('{'))
    }
}

/// Executes a command on a remote host reachable over SSH.
///
/// Abstracted behind a trait so the engine can be tested without a real
/// network or a real CRIU/cuda-checkpoint toolchain.
#[async_trait]
pub trait ShellTransport: Send + Sync {
    async fn exec(
        &self,
        host: &str,
        port: u16,
        command: &str,
        timeout_secs: u64,
    ) -> Result<CommandOutput, CheckpointError>;
}

/// Real transport: shells out to the system `ssh` binary.
pub struct SshTransport {
    user: String,
    connect_timeout_secs: u64,
}

impl SshTransport {
    #[must_use]
    pub fn new(user: impl Into<String>, connect_timeout_secs: u64) -> Self {
        Self {
            user: user.into(),
            connect_timeout_secs,
        }
    }
}

impl Default for SshTransport {
    fn default() -> Self {
        Self::new("root", 10)
    }
}

#[async_trait]
impl ShellTransport for SshTransport {
    async fn exec(
        &self,
        host: &str,
        port: u16,
        command: &str,
        timeout_secs: u64,
    ) -> Result<CommandOutput, CheckpointError> {
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
            .arg(command)
            .kill_on_drop(true);

        let output = timeout(Duration::from_secs(timeout_secs), cmd.output())
            .await
            .map_err(|_| CheckpointError::Transport(format!("ssh to {host}:{port} timed out")))?
            .map_err(|e| CheckpointError::Transport(e.to_string()))?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::{CommandOutput, ShellTransport};
    use crate::error::CheckpointError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Scripted transport for engine tests: returns queued responses in
    /// order, regardless of the command issued.
    pub struct ScriptedTransport {
        responses: Mutex<Vec<CommandOutput>>,
    }

    impl ScriptedTransport {
        pub fn new(responses: Vec<CommandOutput>) -> Self {
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    #[async_trait]
    impl ShellTransport for ScriptedTransport {
        async fn exec(
            &self,
            _host: &str,
            _port: u16,
            _command: &str,
            _timeout_secs: u64,
        ) -> Result<CommandOutput, CheckpointError> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(CheckpointError::Transport("no more scripted responses".into()));
            }
            Ok(responses.remove(0))
        }
    }
}
