//! Remote shell execution for `ssh` nodes.

use crate::error::ConnectorError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, instrument};

/// Where and as whom to run a remote command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Private key file passed to `ssh -i`.
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
}

impl ShellTarget {
    /// Creates a target on the default SSH port.
    #[must_use]
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            username: username.into(),
            identity_file: None,
        }
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_identity_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_file = Some(path.into());
        self
    }
}

/// Captured output of a remote command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
}

impl ShellOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Trait for executing commands on a remote host.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Runs `command` on `target` and captures its output.
    ///
    /// A non-zero exit status is reported in [`ShellOutput`], not as an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the command could not be started at all.
    async fn exec(&self, target: &ShellTarget, command: &str)
    -> Result<ShellOutput, ConnectorError>;
}

/// Shell that delegates to the system OpenSSH client.
#[derive(Debug, Clone)]
pub struct OpenSshShell {
    program: String,
    connect_timeout_secs: u32,
}

impl Default for OpenSshShell {
    fn default() -> Self {
        Self {
            program: "ssh".to_string(),
            connect_timeout_secs: 10,
        }
    }
}

impl OpenSshShell {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the client binary (default `ssh`).
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Builds the argument list for one invocation. Password prompts are
    /// disabled so a missing key fails instead of hanging.
    fn args(&self, target: &ShellTarget, command: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
            "-p".to_string(),
            target.port.to_string(),
        ];
        if let Some(identity) = &target.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        args.push(format!("{}@{}", target.username, target.host));
        args.push("--".to_string());
        args.push(command.to_string());
        args
    }
}

#[async_trait]
impl RemoteShell for OpenSshShell {
    #[instrument(skip(self, command), fields(host = %target.host, port = target.port))]
    async fn exec(
        &self,
        target: &ShellTarget,
        command: &str,
    ) -> Result<ShellOutput, ConnectorError> {
        if target.host.is_empty() {
            return Err(ConnectorError::InvalidRequest {
                reason: "host is required".to_string(),
            });
        }

        let output = Command::new(&self.program)
            .args(self.args(target, command))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ConnectorError::ConnectionFailed {
                reason: format!("failed to start {}: {e}", self.program),
            })?;

        let result = ShellOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        };
        debug!(exit_code = ?result.exit_code, "remote command finished");

        // OpenSSH reserves 255 for its own connection/auth failures.
        if result.exit_code == Some(255) {
            return Err(ConnectorError::AuthenticationFailed {
                reason: result.stderr.trim().to_string(),
            });
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_include_batch_mode_port_and_destination() {
        let shell = OpenSshShell::new();
        let target = ShellTarget::new("db.internal", "deploy")
            .with_port(2222)
            .with_identity_file("/keys/id_ed25519");
        let args = shell.args(&target, "uptime");

        assert!(args.contains(&"BatchMode=yes".to_string()));
        let port_at = args.iter().position(|a| a == "-p").unwrap();
        assert_eq!(args[port_at + 1], "2222");
        let key_at = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[key_at + 1], "/keys/id_ed25519");
        assert_eq!(args[args.len() - 2], "--");
        assert_eq!(args.last().unwrap(), "uptime");
        assert!(args.contains(&"deploy@db.internal".to_string()));
    }

    #[test]
    fn args_omit_identity_when_absent() {
        let args = OpenSshShell::new().args(&ShellTarget::new("h", "u"), "ls");
        assert!(!args.contains(&"-i".to_string()));
    }

    #[tokio::test]
    async fn empty_host_is_rejected() {
        let err = OpenSshShell::new()
            .exec(&ShellTarget::new("", "u"), "ls")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("host"));
    }

    #[tokio::test]
    async fn missing_binary_is_a_connection_failure() {
        let shell = OpenSshShell::new().with_program("flowloom-no-such-ssh-binary");
        let err = shell
            .exec(&ShellTarget::new("h", "u"), "ls")
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::ConnectionFailed { .. }));
    }
}
