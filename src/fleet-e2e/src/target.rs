//! Targets under test and the registry that owns them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Label used when an instance carries no name tag or has not been probed
pub const UNKNOWN: &str = "Unknown";

/// Verification status shared by the overall and per-family fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Pending,
    Pass,
    Fail,
    Unreachable,
    ConfigMissing,
    TestError,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "PENDING",
            Status::Pass => "PASS",
            Status::Fail => "FAIL",
            Status::Unreachable => "UNREACHABLE",
            Status::ConfigMissing => "CONFIG_MISSING",
            Status::TestError => "TEST_ERROR",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One compute instance under end-to-end verification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    pub public_ipv4: Option<Ipv4Addr>,
    pub public_ipv6: Option<Ipv6Addr>,
    pub public_dns: Option<String>,
    pub name: String,
    pub os_name: String,
    pub ssh_user: String,
    /// Address observed by the probe through the tunnel
    pub vpn_ipv4: Option<Ipv4Addr>,
    pub vpn_ipv6: Option<Ipv6Addr>,
    pub overall: Status,
    pub ipv4_result: Status,
    pub ipv6_result: Status,
}

impl Target {
    pub fn new(id: impl Into<String>, ssh_user: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            public_ipv4: None,
            public_ipv6: None,
            public_dns: None,
            name: UNKNOWN.into(),
            os_name: UNKNOWN.into(),
            ssh_user: ssh_user.into(),
            vpn_ipv4: None,
            vpn_ipv6: None,
            overall: Status::Pending,
            ipv4_result: Status::Pending,
            ipv6_result: Status::Pending,
        }
    }

    pub fn with_ipv4(mut self, addr: Ipv4Addr) -> Self {
        self.public_ipv4 = Some(addr);
        self
    }

    pub fn with_ipv6(mut self, addr: Ipv6Addr) -> Self {
        self.public_ipv6 = Some(addr);
        self
    }

    pub fn with_dns(mut self, dns: impl Into<String>) -> Self {
        let dns = dns.into();
        self.public_dns = (!dns.is_empty()).then_some(dns);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Address used for SSH, provisioning and the client config lookup.
    ///
    /// The DNS hostname wins when present, otherwise the IPv4 literal.
    pub fn dial_address(&self) -> Option<String> {
        match &self.public_dns {
            Some(dns) if !dns.is_empty() => Some(dns.clone()),
            _ => self.public_ipv4.map(|ip| ip.to_string()),
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.overall != Status::Unreachable
    }

    pub fn mark_unreachable(&mut self) {
        self.overall = Status::Unreachable;
    }

    /// Derive `overall` from the per-family results.
    ///
    /// A TEST_ERROR already recorded for the whole session is kept.
    pub fn finalize(&mut self) {
        if self.overall == Status::TestError {
            return;
        }
        let v6_ok = self.public_ipv6.is_none() || self.ipv6_result == Status::Pass;
        self.overall = if self.ipv4_result == Status::Pass && v6_ok {
            Status::Pass
        } else {
            Status::Fail
        };
    }
}

/// Canonical, insertion-ordered list of targets for one run
#[derive(Debug, Default, Clone)]
pub struct Registry {
    targets: Vec<Target>,
}

impl Registry {
    pub fn new(targets: Vec<Target>) -> Self {
        Self { targets }
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn targets_mut(&mut self) -> impl Iterator<Item = &mut Target> {
        self.targets.iter_mut()
    }

    pub fn reachable(&self) -> impl Iterator<Item = &Target> {
        self.targets.iter().filter(|t| t.is_reachable())
    }

    pub fn reachable_mut(&mut self) -> impl Iterator<Item = &mut Target> {
        self.targets.iter_mut().filter(|t| t.is_reachable())
    }

    pub fn count(&self, status: Status) -> usize {
        self.targets.iter().filter(|t| t.overall == status).count()
    }
}

impl From<Vec<Target>> for Registry {
    fn from(targets: Vec<Target>) -> Self {
        Self::new(targets)
    }
}
