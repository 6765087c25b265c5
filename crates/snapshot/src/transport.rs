//! Remote command execution over a secure shell transport.

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;

use crate::error::SnapshotError;

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
}

/// Executes a command on a remote host reachable over SSH.
#[async_trait]
pub trait ShellTransport: Send + Sync {
    async fn exec(
        &self,
        host: &str,
        port: u16,
        command: &str,
        timeout_secs: u64,
    ) -> Result<CommandOutput, SnapshotError>;
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
        Self::new("root", 30)
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
    ) -> Result<CommandOutput, SnapshotError> {
        let mut cmd = Command::new("ssh");
        cmd.arg("-o")
            .arg("StrictHostKeyChecking=no")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout_secs))
            .arg("-p")
            .arg(port.to_string())
            .arg(format!("{}@{host}", self.user))
            .arg(command)
            .kill_on_drop(true);

        let output = timeout(Duration::from_secs(timeout_secs), cmd.output())
            .await
            .map_err(|_| SnapshotError::Transport(format!("ssh to {host}:{port} timed out")))?
            .map_err(|e| SnapshotError::Transport(e.to_string()))?;

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
    use crate::error::SnapshotError;
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
        ) -> Result<CommandOutput, SnapshotError> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(SnapshotError::Transport("no more scripted responses".into()));
            }
            Ok(responses.remove(0))
        }
    }
}
