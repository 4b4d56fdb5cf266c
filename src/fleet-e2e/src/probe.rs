//! Public-address probes issued through the tunnel

use crate::error::{E2eError, Result};
use crate::target::Status;
use async_trait::async_trait;
use std::fmt;
use std::process::Stdio;
use std::str::FromStr;
use std::time::Duration;
use tokio::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    V4,
    V6,
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Family::V4 => f.write_str("IPv4"),
            Family::V6 => f.write_str("IPv6"),
        }
    }
}

/// Asks a third party which address our traffic appears to come from
#[async_trait]
pub trait AddressProbe: Send + Sync {
    /// Raw response body
    async fn fetch(&self, family: Family) -> Result<String>;
}

/// Outcome of comparing a probe response with the expected address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification<A> {
    /// Observed address equals the expected one
    Match(A),
    /// Observed a different, well-formed address
    Mismatch(A),
    /// Response was not an address of this family
    Invalid(String),
}

impl<A> Classification<A> {
    pub fn status(&self) -> Status {
        match self {
            Classification::Match(_) => Status::Pass,
            Classification::Mismatch(_) => Status::Fail,
            Classification::Invalid(_) => Status::TestError,
        }
    }

    pub fn observed(&self) -> Option<&A> {
        match self {
            Classification::Match(a) | Classification::Mismatch(a) => Some(a),
            Classification::Invalid(_) => None,
        }
    }
}

/// Exact-equality comparison of a trimmed probe body against `expected`
pub fn classify<A>(raw: &str, expected: A) -> Classification<A>
where
    A: FromStr + PartialEq,
{
    let body = raw.trim();
    match body.parse::<A>() {
        Ok(addr) if addr == expected => Classification::Match(addr),
        Ok(addr) => Classification::Mismatch(addr),
        Err(_) => Classification::Invalid(body.to_string()),
    }
}

/// `curl` against per-family echo endpoints
pub struct CurlProbe {
    pub ipv4_url: String,
    pub ipv6_url: String,
    pub connect_timeout: Duration,
}

impl CurlProbe {
    fn url(&self, family: Family) -> &str {
        match family {
            Family::V4 => &self.ipv4_url,
            Family::V6 => &self.ipv6_url,
        }
    }

    fn args(&self, family: Family) -> Vec<String> {
        vec![
            "-s".into(),
            "--connect-timeout".into(),
            self.connect_timeout.as_secs().max(1).to_string(),
            self.url(family).into(),
        ]
    }
}

#[async_trait]
impl AddressProbe for CurlProbe {
    async fn fetch(&self, family: Family) -> Result<String> {
        let secs = self.connect_timeout.as_secs().max(1);
        // curl's own timeout covers connect only; bound the whole transfer too.
        let deadline = Duration::from_secs(secs * 3);

        let output_future = Command::new("curl")
            .args(self.args(family))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(deadline, output_future)
            .await
            .map_err(|_| E2eError::Timeout {
                operation: "address probe",
                timeout: deadline,
            })?
            .map_err(|e| E2eError::Probe(format!("running curl: {e}")))?;

        if !output.status.success() {
            return Err(E2eError::Probe(format!(
                "curl {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}
