//! E2E run configuration
//!
//! Configuration is resolved in two layers:
//! 1. TOML file (`tests/e2e_config.toml` unless `--config` says otherwise)
//! 2. CLI arguments (highest priority, region/profile/key only)
//!
//! A missing file is not an error; defaults apply.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "tests/e2e_config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct E2eConfig {
    /// Instance inventory (AWS) settings
    pub aws: AwsConfig,
    /// SSH access to the instances
    pub ssh: SshConfig,
    /// Provisioning tool invocation
    pub provision: ProvisionConfig,
    /// Tunnel verification
    pub verify: VerifyConfig,
    /// Report output
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsConfig {
    pub region: String,
    pub profile: Option<String>,
    /// Only instances carrying `tag_key=tag_value` are tested (both must be set)
    pub tag_key: Option<String>,
    pub tag_value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// Private key passed to ssh and the provisioning inventory
    pub key_path: Option<PathBuf>,
    /// Login used when no name prefix matches
    pub default_user: String,
    pub connect_timeout_secs: u64,
    /// Maximum concurrent reachability probes
    pub parallelism: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    pub tool: String,
    pub playbook: PathBuf,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    /// Directory holding one client config per target, named after its dial address
    pub fetch_dir: PathBuf,
    pub config_extension: String,
    pub pid_dir: PathBuf,
    pub openvpn_binary: PathBuf,
    /// Fixed wait between tunnel launch and the first probe
    pub settle_secs: u64,
    pub probe_timeout_secs: u64,
    pub ipv4_probe_url: String,
    pub ipv6_probe_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Markdown report, overwritten on each run
    pub report_path: PathBuf,
    /// Optional JSON dump of the final target list
    pub json_path: Option<PathBuf>,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".into(),
            profile: None,
            tag_key: None,
            tag_value: None,
        }
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            key_path: None,
            default_user: "ec2-user".into(),
            connect_timeout_secs: 5,
            parallelism: 16,
        }
    }
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            tool: "ansible-playbook".into(),
            playbook: PathBuf::from("tests/ec2.yml"),
            timeout_secs: 3600,
        }
    }
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            fetch_dir: PathBuf::from("/tmp/ansible/client1"),
            config_extension: "ovpn".into(),
            pid_dir: PathBuf::from("/tmp"),
            openvpn_binary: PathBuf::from("/usr/bin/openvpn"),
            settle_secs: 10,
            probe_timeout_secs: 10,
            ipv4_probe_url: "https://ipv4.icanhazip.com".into(),
            ipv6_probe_url: "https://ipv6.icanhazip.com".into(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            report_path: PathBuf::from("tests/e2e_report.md"),
            json_path: None,
        }
    }
}

impl SshConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl ProvisionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl VerifyConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl AwsConfig {
    /// Tag filter, only when both halves are configured
    pub fn tag_filter(&self) -> Option<(&str, &str)> {
        match (self.tag_key.as_deref(), self.tag_value.as_deref()) {
            (Some(k), Some(v)) if !k.is_empty() && !v.is_empty() => Some((k, v)),
            _ => None,
        }
    }
}

/// Values from the command line that take precedence over the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub region: Option<String>,
    pub profile: Option<String>,
    pub ssh_key: Option<PathBuf>,
    pub report_path: Option<PathBuf>,
}

impl E2eConfig {
    /// Load configuration from `path`, falling back to defaults when absent
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("parsing config from {}", path.display()))?;
        tracing::info!(path = %path.display(), "Loaded config from file");
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content)?;
        config.ssh.key_path = config.ssh.key_path.map(expand_home);
        Ok(config)
    }

    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(region) = overrides.region {
            self.aws.region = region;
        }
        if let Some(profile) = overrides.profile {
            self.aws.profile = Some(profile);
        }
        if let Some(key) = overrides.ssh_key {
            self.ssh.key_path = Some(expand_home(key));
        }
        if let Some(report) = overrides.report_path {
            self.output.report_path = report;
        }
    }

    /// Non-fatal sanity checks, reported as warnings
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if let Some(key) = &self.ssh.key_path {
            if !key.exists() {
                warnings.push(format!("SSH key file {} does not exist", key.display()));
            }
        }
        if self.aws.tag_key.is_some() != self.aws.tag_value.is_some() {
            warnings.push("aws.tag_key and aws.tag_value must both be set to filter".into());
        }
        if self.ssh.parallelism == 0 {
            warnings.push("ssh.parallelism is 0, probing one target at a time".into());
        }
        warnings
    }

    /// Create sample config file
    pub fn create_sample(path: &Path) -> Result<()> {
        let sample = Self {
            aws: AwsConfig {
                tag_key: Some("Role".into()),
                tag_value: Some("vpn-e2e".into()),
                ..Default::default()
            },
            ssh: SshConfig {
                key_path: Some(PathBuf::from("~/.ssh/id_ed25519")),
                ..Default::default()
            },
            ..Default::default()
        };

        let content = toml::to_string_pretty(&sample)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Replace a leading `~` with the home directory; other paths pass through
pub fn expand_home(path: PathBuf) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path;
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path,
    }
}
