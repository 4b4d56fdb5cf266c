//! Instance inventory via the AWS CLI

use crate::error::{E2eError, Result};
use crate::target::{Target, UNKNOWN};
use async_trait::async_trait;
use serde::Deserialize;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

const DESCRIBE_TIMEOUT_SECS: u64 = 120;

/// Supplies the candidate targets for a run, in a stable order
#[async_trait]
pub trait InventoryProvider: Send + Sync {
    async fn list_targets(&self) -> Result<Vec<Target>>;
}

/// Running EC2 instances with a public IPv4 address
pub struct Ec2Inventory {
    pub region: String,
    pub profile: Option<String>,
    pub tag: Option<(String, String)>,
    /// Login assigned before the prober refines it
    pub default_user: String,
}

impl Ec2Inventory {
    fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "ec2".into(),
            "describe-instances".into(),
            "--output".into(),
            "json".into(),
            "--region".into(),
            self.region.clone(),
        ];
        if let Some(profile) = &self.profile {
            args.push("--profile".into());
            args.push(profile.clone());
        }
        args.push("--filters".into());
        args.push("Name=instance-state-name,Values=running".into());
        if let Some((key, value)) = &self.tag {
            args.push(format!("Name=tag:{key},Values={value}"));
        }
        args
    }
}

#[async_trait]
impl InventoryProvider for Ec2Inventory {
    async fn list_targets(&self) -> Result<Vec<Target>> {
        info!(
            region = %self.region,
            profile = self.profile.as_deref().unwrap_or("default"),
            "Enumerating instances"
        );

        let timeout = Duration::from_secs(DESCRIBE_TIMEOUT_SECS);
        let output = tokio::time::timeout(
            timeout,
            Command::new("aws")
                .args(self.args())
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| E2eError::Timeout {
            operation: "aws ec2 describe-instances",
            timeout,
        })?
        .map_err(|e| E2eError::Inventory(format!("running aws cli: {e}")))?;

        if !output.status.success() {
            return Err(E2eError::Inventory(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let targets = parse_describe_instances(&output.stdout, &self.default_user)?;
        info!(count = targets.len(), "Found running instances with public IPs");
        Ok(targets)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeInstances {
    #[serde(default)]
    reservations: Vec<Reservation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Reservation {
    #[serde(default)]
    instances: Vec<Instance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Instance {
    instance_id: String,
    public_ip_address: Option<String>,
    public_dns_name: Option<String>,
    #[serde(default)]
    tags: Vec<Tag>,
    #[serde(default)]
    network_interfaces: Vec<NetworkInterface>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Tag {
    key: String,
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NetworkInterface {
    #[serde(default)]
    ipv6_addresses: Vec<Ipv6Entry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Ipv6Entry {
    ipv6_address: String,
}

/// Turn `describe-instances` JSON into targets, skipping instances without a public IPv4
pub fn parse_describe_instances(json: &[u8], default_user: &str) -> Result<Vec<Target>> {
    let doc: DescribeInstances = serde_json::from_slice(json)?;

    let mut targets = Vec::new();
    for instance in doc.reservations.into_iter().flat_map(|r| r.instances) {
        let Some(raw_ip) = instance.public_ip_address.as_deref() else {
            debug!(id = %instance.instance_id, "Skipping instance without public IPv4");
            continue;
        };
        let Ok(ipv4) = raw_ip.parse::<Ipv4Addr>() else {
            warn!(id = %instance.instance_id, addr = %raw_ip, "Skipping instance with bad public IPv4");
            continue;
        };

        let name = instance
            .tags
            .iter()
            .find(|t| t.key == "Name")
            .map(|t| t.value.clone())
            .unwrap_or_else(|| UNKNOWN.into());

        let ipv6 = instance
            .network_interfaces
            .iter()
            .find_map(|ni| ni.ipv6_addresses.first())
            .and_then(|entry| match entry.ipv6_address.parse::<Ipv6Addr>() {
                Ok(addr) => Some(addr),
                Err(_) => {
                    warn!(id = %instance.instance_id, addr = %entry.ipv6_address, "Ignoring bad IPv6");
                    None
                }
            });

        let mut target = Target::new(instance.instance_id, default_user)
            .with_ipv4(ipv4)
            .with_name(name)
            .with_dns(instance.public_dns_name.unwrap_or_default());
        target.public_ipv6 = ipv6;
        targets.push(target);
    }
    Ok(targets)
}
