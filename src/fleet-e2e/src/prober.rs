//! Reachability probing and OS/login detection

use crate::ssh::RemoteShell;
use crate::target::Target;
use futures::stream::{self, StreamExt};
use regex::Regex;
use std::sync::OnceLock;
use tracing::{error, info};

/// Identity-revealing command run on every target
pub const OS_RELEASE_COMMAND: &str = "grep 'PRETTY_NAME=' /etc/os-release";

/// OS label when the command succeeds but prints no PRETTY_NAME
pub const FALLBACK_OS: &str = "Linux (Unknown)";

/// Name prefix → login account, checked in order
const USER_BY_NAME_PREFIX: &[(&str, &str)] = &[
    ("fedora", "fedora"),
    ("ubuntu", "ubuntu"),
    ("debian", "admin"),
    ("rocky", "rocky"),
];

/// Pick the login account for an instance from its display name
pub fn login_for(name: &str, default_user: &str) -> String {
    let name = name.to_lowercase();
    USER_BY_NAME_PREFIX
        .iter()
        .find(|(prefix, _)| name.starts_with(prefix))
        .map(|(_, user)| (*user).to_string())
        .unwrap_or_else(|| default_user.to_string())
}

/// Extract `PRETTY_NAME="..."` from os-release output
pub fn parse_pretty_name(output: &str) -> Option<String> {
    static PRETTY_NAME: OnceLock<Regex> = OnceLock::new();
    let re = PRETTY_NAME
        .get_or_init(|| Regex::new(r#"PRETTY_NAME="(.+)""#).expect("static PRETTY_NAME pattern"));
    re.captures(output).map(|c| c[1].to_string())
}

pub struct Prober<'a> {
    shell: &'a dyn RemoteShell,
    default_user: String,
}

impl<'a> Prober<'a> {
    pub fn new(shell: &'a dyn RemoteShell, default_user: impl Into<String>) -> Self {
        Self {
            shell,
            default_user: default_user.into(),
        }
    }

    /// Probe one target, recording login and OS on success.
    ///
    /// Failure marks the target UNREACHABLE and returns false.
    pub async fn probe(&self, target: &mut Target) -> bool {
        let user = login_for(&target.name, &self.default_user);
        let Some(host) = target.dial_address() else {
            error!(id = %target.id, "No address to dial");
            target.mark_unreachable();
            return false;
        };

        info!(id = %target.id, %host, %user, "Checking SSH");

        match self.shell.exec(&host, &user, OS_RELEASE_COMMAND).await {
            Ok(output) => {
                target.ssh_user = user;
                target.os_name = parse_pretty_name(&output).unwrap_or_else(|| FALLBACK_OS.into());
                info!(id = %target.id, os = %target.os_name, "SSH OK");
                true
            }
            Err(e) => {
                error!(id = %target.id, %host, %user, error = %e, "Failed to SSH");
                target.mark_unreachable();
                false
            }
        }
    }

    /// Probe every target with at most `parallelism` in flight.
    ///
    /// Returns the number of reachable targets.
    pub async fn probe_all<'t, I>(&self, targets: I, parallelism: usize) -> usize
    where
        I: IntoIterator<Item = &'t mut Target>,
    {
        stream::iter(targets)
            .map(|target| self.probe(target))
            .buffer_unordered(parallelism.max(1))
            .filter(|reachable| futures::future::ready(*reachable))
            .count()
            .await
    }
}
