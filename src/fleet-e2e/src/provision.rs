//! Batch provisioning of every reachable target

use crate::error::{E2eError, Result};
use crate::target::Registry;
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{error, info, warn};

/// One line of the connection manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestHost {
    pub address: String,
    pub user: String,
    /// Value the role uses as the VPN server's advertised hostname
    pub server_hostname: String,
}

/// Applies configuration to all hosts in one call
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn provision(&self, hosts: &[ManifestHost]) -> Result<()>;
}

/// Manifest entries for the reachable subset, registry order
pub fn manifest_hosts(registry: &Registry) -> Vec<ManifestHost> {
    registry
        .reachable()
        .filter_map(|t| {
            Some(ManifestHost {
                address: t.dial_address()?,
                user: t.ssh_user.clone(),
                server_hostname: t.public_ipv4?.to_string(),
            })
        })
        .collect()
}

/// Run the provisioning step over the registry.
///
/// An empty reachable set is a hard failure and the tool is not invoked.
/// A tool failure is returned but never recorded on individual targets.
pub async fn provision_reachable(registry: &Registry, provisioner: &dyn Provisioner) -> Result<()> {
    let hosts = manifest_hosts(registry);
    if hosts.is_empty() {
        error!("No reachable instances to provision");
        return Err(E2eError::NoReachableTargets);
    }

    info!(count = hosts.len(), "Provisioning instances");
    match provisioner.provision(&hosts).await {
        Ok(()) => {
            info!("Provisioning complete");
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "Provisioning failed (some hosts may have failed)");
            Err(e)
        }
    }
}

/// Render an Ansible INI inventory for `hosts`
pub fn render_inventory(hosts: &[ManifestHost], key_path: Option<&Path>) -> String {
    let mut out = String::new();
    for host in hosts {
        out.push_str(&format!("{} ansible_user={} ", host.address, host.user));
        if let Some(key) = key_path {
            out.push_str(&format!("ansible_ssh_private_key_file={} ", key.display()));
        }
        out.push_str("ansible_python_interpreter=auto_silent ");
        out.push_str("ansible_ssh_common_args='-o StrictHostKeyChecking=no' ");
        out.push_str(&format!("openvpn_server_hostname={}\n", host.server_hostname));
    }
    out
}

/// `ansible-playbook` against a temporary inventory
pub struct AnsibleProvisioner {
    pub tool: String,
    pub playbook: PathBuf,
    pub key_path: Option<PathBuf>,
    pub timeout: Duration,
    /// Where the temporary inventory is written
    pub scratch_dir: PathBuf,
}

#[async_trait]
impl Provisioner for AnsibleProvisioner {
    async fn provision(&self, hosts: &[ManifestHost]) -> Result<()> {
        // Removed when dropped, on every return path below.
        let mut inventory = tempfile::Builder::new()
            .prefix("fleet-e2e-inventory-")
            .suffix(".ini")
            .tempfile_in(&self.scratch_dir)?;
        inventory.write_all(render_inventory(hosts, self.key_path.as_deref()).as_bytes())?;
        inventory.flush()?;

        let status_future = Command::new(&self.tool)
            .arg("-i")
            .arg(inventory.path())
            .arg(&self.playbook)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .status();

        let status = tokio::time::timeout(self.timeout, status_future)
            .await
            .map_err(|_| E2eError::Timeout {
                operation: "provisioning",
                timeout: self.timeout,
            })?
            .map_err(|e| E2eError::Provisioning(format!("running {}: {e}", self.tool)))?;

        if !status.success() {
            return Err(E2eError::Provisioning(format!("{} exited with {status}", self.tool)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{Status, Target};
    use std::net::Ipv4Addr;
    use std::sync::Mutex;

    struct Recorder {
        fail: bool,
        seen: Mutex<Vec<Vec<ManifestHost>>>,
    }

    impl Recorder {
        fn new(fail: bool) -> Self {
            Self {
                fail,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Provisioner for Recorder {
        async fn provision(&self, hosts: &[ManifestHost]) -> Result<()> {
            self.seen.lock().unwrap().push(hosts.to_vec());
            if self.fail {
                return Err(E2eError::Provisioning("exit status: 2".into()));
            }
            Ok(())
        }
    }

    fn registry() -> Registry {
        let mut down = Target::new("i-2", "ec2-user").with_ipv4(Ipv4Addr::new(203, 0, 113, 2));
        down.mark_unreachable();
        let mut up = Target::new("i-1", "ec2-user")
            .with_ipv4(Ipv4Addr::new(203, 0, 113, 1))
            .with_dns("ec2-1.example");
        up.ssh_user = "ubuntu".into();
        Registry::new(vec![up, down])
    }

    #[test]
    fn manifest_excludes_unreachable() {
        let hosts = manifest_hosts(&registry());
        assert_eq!(
            hosts,
            [ManifestHost {
                address: "ec2-1.example".into(),
                user: "ubuntu".into(),
                server_hostname: "203.0.113.1".into(),
            }]
        );
    }

    #[test]
    fn inventory_line_format() {
        let hosts = manifest_hosts(&registry());
        let with_key = render_inventory(&hosts, Some(Path::new("/k/id")));
        assert_eq!(
            with_key,
            "ec2-1.example ansible_user=ubuntu ansible_ssh_private_key_file=/k/id \
             ansible_python_interpreter=auto_silent \
             ansible_ssh_common_args='-o StrictHostKeyChecking=no' \
             openvpn_server_hostname=203.0.113.1\n"
        );
        assert!(!render_inventory(&hosts, None).contains("private_key"));
    }

    #[tokio::test]
    async fn invokes_tool_once_for_whole_set() {
        let recorder = Recorder::new(false);
        provision_reachable(&registry(), &recorder).await.unwrap();
        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].len(), 1);
    }

    #[tokio::test]
    async fn empty_reachable_set_skips_tool() {
        let mut reg = registry();
        reg.targets_mut().for_each(|t| t.mark_unreachable());
        let recorder = Recorder::new(false);

        let err = provision_reachable(&reg, &recorder).await.unwrap_err();
        assert!(matches!(err, E2eError::NoReachableTargets));
        assert!(recorder.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn tool_failure_leaves_targets_untouched() {
        let reg = registry();
        let recorder = Recorder::new(true);
        assert!(provision_reachable(&reg, &recorder).await.is_err());
        assert_eq!(reg.targets()[0].overall, Status::Pending);
    }

    #[tokio::test]
    async fn failing_tool_removes_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let ansible = AnsibleProvisioner {
            tool: "false".into(),
            playbook: PathBuf::from("site.yml"),
            key_path: None,
            timeout: Duration::from_secs(10),
            scratch_dir: dir.path().to_path_buf(),
        };

        let err = ansible.provision(&manifest_hosts(&registry())).await.unwrap_err();
        assert!(matches!(err, E2eError::Provisioning(_)));
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert!(leftovers.is_empty());
    }
}
