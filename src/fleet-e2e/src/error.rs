//! Error types for the verification pipeline.
//!
//! Collaborator seams return [`Result<T>`] which wraps [`E2eError`]. None of
//! these errors abort a run on their own: each stage maps them onto the
//! affected target's status.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum E2eError {
    /// Remote command exited non-zero or the connection failed
    #[error("remote command on {host} failed: {detail}")]
    RemoteCommand { host: String, detail: String },

    /// An external operation exceeded its deadline
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// The tunnel client could not be started
    #[error("tunnel launch failed: {0}")]
    TunnelLaunch(String),

    /// Address probe did not return output
    #[error("address probe failed: {0}")]
    Probe(String),

    /// Provisioning tool exited non-zero
    #[error("provisioning failed: {0}")]
    Provisioning(String),

    /// Instance enumeration failed
    #[error("inventory query failed: {0}")]
    Inventory(String),

    /// Provisioning was requested with an empty reachable set
    #[error("no reachable targets to provision")]
    NoReachableTargets,

    /// Output from an external tool could not be interpreted
    #[error("parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, E2eError>;

impl From<serde_json::Error> for E2eError {
    fn from(e: serde_json::Error) -> Self {
        E2eError::Parse(e.to_string())
    }
}
