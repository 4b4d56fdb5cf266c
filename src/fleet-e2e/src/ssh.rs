//! Remote command execution over the system `ssh` client

use crate::error::{E2eError, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Slack on top of ssh's own ConnectTimeout before the whole call is abandoned
const COMMAND_GRACE_SECS: u64 = 25;

/// Runs a single command on a remote host and returns its stdout
#[async_trait]
pub trait RemoteShell: Send + Sync {
    async fn exec(&self, host: &str, user: &str, command: &str) -> Result<String>;
}

/// Key-based ssh, non-interactive, host keys not checked
pub struct SshShell {
    key_path: Option<PathBuf>,
    connect_timeout: Duration,
}

impl SshShell {
    pub fn new(key_path: Option<PathBuf>, connect_timeout: Duration) -> Self {
        Self {
            key_path,
            connect_timeout,
        }
    }

    fn args(&self, host: &str, user: &str, command: &str) -> Vec<String> {
        let mut args: Vec<String> = [
            "-o",
            "StrictHostKeyChecking=no",
            "-o",
            "UserKnownHostsFile=/dev/null",
            "-o",
            "LogLevel=ERROR",
            "-o",
            "BatchMode=yes",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        args.push("-o".into());
        args.push(format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)));
        if let Some(key) = &self.key_path {
            args.push("-i".into());
            args.push(key.display().to_string());
        }
        args.push(format!("{user}@{host}"));
        args.push(command.into());
        args
    }
}

#[async_trait]
impl RemoteShell for SshShell {
    async fn exec(&self, host: &str, user: &str, command: &str) -> Result<String> {
        let deadline = self.connect_timeout + Duration::from_secs(COMMAND_GRACE_SECS);

        let output_future = Command::new("ssh")
            .args(self.args(host, user, command))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(deadline, output_future)
            .await
            .map_err(|_| E2eError::Timeout {
                operation: "ssh command",
                timeout: deadline,
            })?
            .map_err(|e| E2eError::RemoteCommand {
                host: host.into(),
                detail: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(E2eError::RemoteCommand {
                host: host.into(),
                detail: format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_include_key_and_timeout() {
        let shell = SshShell::new(Some(PathBuf::from("/keys/id")), Duration::from_secs(5));
        let args = shell.args("host.example", "ubuntu", "uname");

        assert!(args.contains(&"ConnectTimeout=5".to_string()));
        let i = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[i + 1], "/keys/id");
        assert_eq!(args[args.len() - 2], "ubuntu@host.example");
        assert_eq!(args.last().unwrap(), "uname");
    }

    #[test]
    fn args_without_key() {
        let shell = SshShell::new(None, Duration::from_secs(5));
        let args = shell.args("10.0.0.1", "admin", "true");
        assert!(!args.contains(&"-i".to_string()));
    }
}
