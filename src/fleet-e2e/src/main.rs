//! Fleet VPN E2E Test Runner
//!
//! Usage:
//!   # Test every running instance tagged Role=vpn-e2e
//!   fleet-e2e --config tests/e2e_config.toml --ssh-key ~/.ssh/id_ed25519
//!
//!   # Re-verify without re-provisioning
//!   fleet-e2e --skip-provision
//!
//!   # Generate sample config
//!   fleet-e2e --init-config --config tests/e2e_config.toml
//!
//! Exit codes: 0 all passed, 1 fatal error, 2 no instances, 3 failures.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use fleet_e2e::config::{E2eConfig, Overrides, DEFAULT_CONFIG_PATH};
use fleet_e2e::inventory::Ec2Inventory;
use fleet_e2e::probe::CurlProbe;
use fleet_e2e::provision::{AnsibleProvisioner, Provisioner};
use fleet_e2e::ssh::SshShell;
use fleet_e2e::tunnel::OpenVpnTunnel;
use fleet_e2e::{Pipeline, TunnelVerifier};

#[derive(Parser)]
#[command(name = "fleet-e2e")]
#[command(about = "Verify VPN routing end-to-end across a fleet of EC2 instances")]
#[command(version)]
struct Cli {
    /// Path to TOML config file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Path to SSH private key (overrides config)
    #[arg(long)]
    ssh_key: Option<PathBuf>,

    /// AWS region (overrides config)
    #[arg(long)]
    region: Option<String>,

    /// AWS CLI profile (overrides config)
    #[arg(long)]
    profile: Option<String>,

    /// Markdown report path (overrides config)
    #[arg(long)]
    report: Option<PathBuf>,

    /// Verify already-provisioned instances
    #[arg(long)]
    skip_provision: bool,

    /// Write a sample config file to --config and exit
    #[arg(long)]
    init_config: bool,

    /// Verbose output
    #[arg(long, short)]
    verbose: bool,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            region: self.region.clone(),
            profile: self.profile.clone(),
            ssh_key: self.ssh_key.clone(),
            report_path: self.report.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(if cli.verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if cli.init_config {
        E2eConfig::create_sample(&cli.config)?;
        println!("Sample config created at: {}", cli.config.display());
        return Ok(());
    }

    let mut config = E2eConfig::load(&cli.config)?;
    config.apply(cli.overrides());
    for warning in config.warnings() {
        tracing::warn!("{warning}");
    }

    let code = run(&config, cli.skip_provision).await?;
    std::process::exit(code);
}

async fn run(config: &E2eConfig, skip_provision: bool) -> Result<i32> {
    let inventory = Ec2Inventory {
        region: config.aws.region.clone(),
        profile: config.aws.profile.clone(),
        tag: config
            .aws
            .tag_filter()
            .map(|(k, v)| (k.to_string(), v.to_string())),
        default_user: config.ssh.default_user.clone(),
    };
    let shell = SshShell::new(config.ssh.key_path.clone(), config.ssh.connect_timeout());
    let ansible = AnsibleProvisioner {
        tool: config.provision.tool.clone(),
        playbook: config.provision.playbook.clone(),
        key_path: config.ssh.key_path.clone(),
        timeout: config.provision.timeout(),
        scratch_dir: std::env::temp_dir(),
    };
    let tunnel = OpenVpnTunnel {
        binary: config.verify.openvpn_binary.clone(),
    };
    let probe = CurlProbe {
        ipv4_url: config.verify.ipv4_probe_url.clone(),
        ipv6_url: config.verify.ipv6_probe_url.clone(),
        connect_timeout: config.verify.probe_timeout(),
    };

    let provisioner: Option<&dyn Provisioner> = if skip_provision {
        None
    } else {
        Some(&ansible)
    };

    let pipeline = Pipeline {
        inventory: &inventory,
        shell: &shell,
        provisioner,
        verifier: TunnelVerifier::new(&tunnel, &probe, config.verify.fetch_dir.clone())
            .config_extension(config.verify.config_extension.clone())
            .pid_dir(config.verify.pid_dir.clone())
            .settle(config.verify.settle()),
        default_user: config.ssh.default_user.clone(),
        parallelism: config.ssh.parallelism,
        show_progress: std::io::stderr().is_terminal(),
    };

    let outcome = pipeline.run().await.context("running E2E pipeline")?;

    let report_path = &config.output.report_path;
    outcome
        .report
        .save_markdown(report_path)
        .with_context(|| format!("writing report to {}", report_path.display()))?;
    tracing::info!(path = %report_path.display(), "Report generated");

    if let Some(json_path) = &config.output.json_path {
        outcome
            .report
            .save_json(json_path)
            .with_context(|| format!("writing JSON report to {}", json_path.display()))?;
        tracing::info!(path = %json_path.display(), "JSON report generated");
    }

    outcome.report.print_summary();
    Ok(outcome.verdict.exit_code())
}
