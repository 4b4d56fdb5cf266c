//! Client tunnel lifecycle
//!
//! A tunnel rewrites the host's default route while it is up, so every
//! launch is paired with exactly one teardown through [`with_tunnel`].

use crate::error::{E2eError, Result};
use async_trait::async_trait;
use futures::FutureExt;
use std::ffi::OsString;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Files scoped to one target's verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSession {
    pub target_id: String,
    pub config_path: PathBuf,
    pub pid_file: PathBuf,
}

impl TunnelSession {
    pub fn new(target_id: &str, config_path: PathBuf, pid_dir: &Path) -> Self {
        Self {
            target_id: target_id.into(),
            config_path,
            pid_file: pid_dir.join(pid_file_name(target_id)),
        }
    }
}

/// `openvpn_<id>.pid` with anything outside `[A-Za-z0-9_-]` replaced
pub fn pid_file_name(target_id: &str) -> String {
    let safe: String = target_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("openvpn_{safe}.pid")
}

#[async_trait]
pub trait Tunnel: Send + Sync {
    /// Bring the tunnel up in the background
    async fn start(&self, session: &TunnelSession) -> Result<()>;

    /// Tear the tunnel down; must tolerate a tunnel that never came up
    async fn stop(&self, session: &TunnelSession) -> Result<()>;
}

/// Launch the tunnel, run `body`, then always tear the tunnel down.
///
/// A panic inside `start` or `body` is caught and reported as an error
/// after teardown has run.
pub async fn with_tunnel<T, F>(tunnel: &dyn Tunnel, session: &TunnelSession, body: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send,
{
    let started = match AssertUnwindSafe(tunnel.start(session)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(E2eError::TunnelLaunch(format!(
            "launch panicked: {}",
            panic_message(panic.as_ref())
        ))),
    };

    let outcome = match started {
        Ok(()) => match AssertUnwindSafe(body).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(E2eError::Probe(format!(
                "probe panicked: {}",
                panic_message(panic.as_ref())
            ))),
        },
        Err(e) => Err(e),
    };

    if let Err(e) = tunnel.stop(session).await {
        warn!(id = %session.target_id, error = %e, "Tunnel teardown failed");
    }
    outcome
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}

/// OpenVPN client daemonized under sudo, tracked through its pid file
pub struct OpenVpnTunnel {
    pub binary: PathBuf,
}

impl OpenVpnTunnel {
    /// Arguments to `sudo` for a daemonized client writing `session.pid_file`
    fn args(&self, session: &TunnelSession) -> Vec<OsString> {
        vec![
            self.binary.clone().into_os_string(),
            "--config".into(),
            session.config_path.clone().into_os_string(),
            "--daemon".into(),
            "--writepid".into(),
            session.pid_file.clone().into_os_string(),
        ]
    }
}

/// Remove a pid file, escalating to `sudo rm -f` when it is owned by root.
///
/// A missing file is fine.
pub async fn remove_pid_file(session: &TunnelSession) -> Result<()> {
    match tokio::fs::remove_file(&session.pid_file).await {
        Ok(()) => return Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) if e.kind() != std::io::ErrorKind::PermissionDenied => return Err(e.into()),
        Err(_) => {}
    }

    let status = Command::new("sudo")
        .arg("rm")
        .arg("-f")
        .arg(&session.pid_file)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;
    if !status.success() {
        warn!(id = %session.target_id, pid_file = %session.pid_file.display(), "Could not remove pid file");
    }
    Ok(())
}

#[async_trait]
impl Tunnel for OpenVpnTunnel {
    async fn start(&self, session: &TunnelSession) -> Result<()> {
        info!(id = %session.target_id, config = %session.config_path.display(), "Starting OpenVPN");

        // A leftover pid from a crashed run may name an unrelated process by now.
        if tokio::fs::try_exists(&session.pid_file).await.unwrap_or(false) {
            warn!(id = %session.target_id, pid_file = %session.pid_file.display(), "Removing stale pid file");
            remove_pid_file(session).await?;
        }

        let output = Command::new("sudo")
            .args(self.args(session))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| E2eError::TunnelLaunch(format!("spawning {}: {e}", self.binary.display())))?;

        if !output.status.success() {
            return Err(E2eError::TunnelLaunch(format!(
                "{}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn stop(&self, session: &TunnelSession) -> Result<()> {
        let raw = match tokio::fs::read_to_string(&session.pid_file).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(id = %session.target_id, "No pid file, nothing to stop");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        match raw.trim().parse::<u32>() {
            Ok(pid) => {
                let status = Command::new("sudo")
                    .args(["kill", "-9", &pid.to_string()])
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status()
                    .await?;
                if !status.success() {
                    // Already gone.
                    debug!(id = %session.target_id, pid, "kill reported {status}");
                }
            }
            Err(_) => warn!(id = %session.target_id, contents = %raw.trim(), "Unreadable pid file"),
        }

        remove_pid_file(session).await?;
        info!(id = %session.target_id, "OpenVPN stopped");
        Ok(())
    }
}
