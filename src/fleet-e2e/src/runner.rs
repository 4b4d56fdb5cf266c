//! End-to-end pipeline: inventory → probe → provision → verify → report

use crate::error::Result;
use crate::inventory::InventoryProvider;
use crate::prober::Prober;
use crate::provision::{provision_reachable, Provisioner};
use crate::report::E2eReport;
use crate::ssh::RemoteShell;
use crate::target::{Registry, Status};
use crate::verifier::TunnelVerifier;
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tracing::{error, info, warn};

/// How a run ended, mapped onto the process exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Every target passed
    AllPassed,
    /// The inventory returned no targets
    NoTargets,
    /// At least one target ended in a non-PASS state
    Failures,
}

impl Verdict {
    pub fn exit_code(&self) -> i32 {
        match self {
            Verdict::AllPassed => 0,
            Verdict::NoTargets => 2,
            Verdict::Failures => 3,
        }
    }

    pub fn from_registry(registry: &Registry) -> Self {
        if registry.is_empty() {
            Verdict::NoTargets
        } else if registry.count(Status::Pass) == registry.len() {
            Verdict::AllPassed
        } else {
            Verdict::Failures
        }
    }
}

/// Collaborators and knobs for one run
pub struct Pipeline<'a> {
    pub inventory: &'a dyn InventoryProvider,
    pub shell: &'a dyn RemoteShell,
    /// `None` skips provisioning
    pub provisioner: Option<&'a dyn Provisioner>,
    pub verifier: TunnelVerifier<'a>,
    pub default_user: String,
    pub parallelism: usize,
    pub show_progress: bool,
}

pub struct RunOutcome {
    pub report: E2eReport,
    pub verdict: Verdict,
}

impl Pipeline<'_> {
    /// Execute every stage. Only an inventory failure returns `Err`; per-target
    /// problems are recorded on the targets.
    pub async fn run(&self) -> Result<RunOutcome> {
        let mut registry = Registry::new(self.inventory.list_targets().await?);
        if registry.is_empty() {
            error!("No instances found");
            return Ok(RunOutcome {
                report: E2eReport::new(registry.targets(), Utc::now()),
                verdict: Verdict::NoTargets,
            });
        }

        let prober = Prober::new(self.shell, self.default_user.clone());
        let reachable = prober
            .probe_all(registry.targets_mut(), self.parallelism)
            .await;
        info!(reachable, total = registry.len(), "Reachability probing complete");

        match self.provisioner {
            Some(provisioner) => {
                let pb = self.spinner("Provisioning reachable instances...");
                let result = provision_reachable(&registry, provisioner).await;
                finish(pb, if result.is_ok() { "Provisioning complete" } else { "Provisioning failed" });
            }
            None => warn!("Provisioning skipped"),
        }

        // Sequential: each tunnel replaces the host's default route.
        for target in registry.reachable_mut() {
            self.verifier.verify(target).await;
        }

        Ok(RunOutcome {
            verdict: Verdict::from_registry(&registry),
            report: E2eReport::new(registry.targets(), Utc::now()),
        })
    }

    fn spinner(&self, msg: &str) -> Option<ProgressBar> {
        if !self.show_progress {
            return None;
        }
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.blue} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        Some(pb)
    }
}

fn finish(pb: Option<ProgressBar>, msg: &'static str) {
    if let Some(pb) = pb {
        pb.finish_with_message(msg);
    }
}
