//! Fleet VPN E2E verification
//!
//! Confirms that every instance provisioned with the VPN server role
//! routes client traffic through itself, over IPv4 and IPv6:
//! - Instance discovery
//! - SSH reachability and OS detection
//! - Batch provisioning
//! - Per-instance tunnel verification
//! - Report generation

pub mod config;
pub mod error;
pub mod inventory;
pub mod probe;
pub mod prober;
pub mod provision;
pub mod report;
pub mod runner;
pub mod ssh;
pub mod target;
pub mod tunnel;
pub mod verifier;

pub use config::E2eConfig;
pub use error::{E2eError, Result};
pub use report::E2eReport;
pub use runner::{Pipeline, RunOutcome, Verdict};
pub use target::{Registry, Status, Target};
pub use verifier::TunnelVerifier;
