//! Test report generation

use crate::target::{Status, Target};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::path::Path;

/// Placeholder for absent optional fields
pub const NOT_AVAILABLE: &str = "N/A";

pub const COLUMNS: [&str; 10] = [
    "Instance ID",
    "Name",
    "OS",
    "Public IPv4",
    "Public IPv6",
    "VPN IPv4",
    "VPN IPv6",
    "IPv4 Status",
    "IPv6 Status",
    "Overall",
];

/// Final state of a run, in registry order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct E2eReport {
    pub timestamp: DateTime<Utc>,
    pub targets: Vec<Target>,
}

impl E2eReport {
    pub fn new(targets: &[Target], timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            targets: targets.to_vec(),
        }
    }

    pub fn passed(&self) -> usize {
        self.count(Status::Pass)
    }

    pub fn count(&self, status: Status) -> usize {
        self.targets.iter().filter(|t| t.overall == status).count()
    }

    pub fn all_passed(&self) -> bool {
        !self.targets.is_empty() && self.passed() == self.targets.len()
    }

    /// Save report as JSON
    pub fn save_json(&self, path: &Path) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        write_creating_parent(path, &content)
    }

    /// Save report as Markdown
    pub fn save_markdown(&self, path: &Path) -> anyhow::Result<()> {
        write_creating_parent(path, &self.to_markdown())
    }

    /// One table row per target; optional fields render as "N/A"
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();

        md.push_str("# End-to-End Test Report\n\n");
        md.push_str(&format!(
            "Date: {}\n\n",
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
        ));

        md.push_str(&format!("| {} |\n", COLUMNS.join(" | ")));
        md.push_str(&format!("|{}\n", "---|".repeat(COLUMNS.len())));

        for t in &self.targets {
            let cells = [
                cell(&t.id),
                cell(&t.name),
                cell(&t.os_name),
                opt(t.public_ipv4),
                opt(t.public_ipv6),
                opt(t.vpn_ipv4),
                opt(t.vpn_ipv6),
                t.ipv4_result.to_string(),
                t.ipv6_result.to_string(),
                t.overall.to_string(),
            ];
            md.push_str(&format!("| {} |\n", cells.join(" | ")));
        }

        md
    }

    /// Print summary to console
    pub fn print_summary(&self) {
        use colored::Colorize;

        println!("\n{}", "═".repeat(60).blue());
        println!("{}", " E2E Test Report ".bold().blue());
        println!("{}", "═".repeat(60).blue());

        for t in &self.targets {
            let overall = match t.overall {
                Status::Pass => t.overall.to_string().green(),
                Status::Fail | Status::TestError => t.overall.to_string().red(),
                _ => t.overall.to_string().yellow(),
            };
            println!(
                "  [{}] {} {} - v4 {} / v6 {}",
                overall,
                t.id,
                t.name.dimmed(),
                t.ipv4_result,
                t.ipv6_result
            );
        }

        println!("\n{}", "─".repeat(60));
        if self.all_passed() {
            println!(
                "{} {}/{}",
                "ALL TARGETS PASSED".green().bold(),
                self.passed(),
                self.targets.len()
            );
        } else {
            println!(
                "{} Passed: {}, Failed: {}, Errors: {}, Unreachable: {}, Config missing: {}",
                "TARGETS FAILED".red().bold(),
                self.passed(),
                self.count(Status::Fail),
                self.count(Status::TestError),
                self.count(Status::Unreachable),
                self.count(Status::ConfigMissing)
            );
        }
        println!("{}\n", "═".repeat(60).blue());
    }
}

fn write_creating_parent(path: &Path, content: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, content)?;
    Ok(())
}

fn cell(text: &str) -> String {
    if text.is_empty() {
        return NOT_AVAILABLE.into();
    }
    text.replace('|', "\\|")
}

fn opt<T: Display>(value: Option<T>) -> String {
    value.map_or_else(|| NOT_AVAILABLE.into(), |v| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::net::Ipv4Addr;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 9, 30, 0).unwrap()
    }

    #[test]
    fn header_and_separator() {
        let md = E2eReport::new(&[], at()).to_markdown();
        assert!(md.starts_with("# End-to-End Test Report\n\nDate: 2026-10-18 09:30:00 UTC\n"));
        assert!(md.contains(
            "| Instance ID | Name | OS | Public IPv4 | Public IPv6 | VPN IPv4 | VPN IPv6 | IPv4 Status | IPv6 Status | Overall |\n\
             |---|---|---|---|---|---|---|---|---|---|\n"
        ));
    }

    #[test]
    fn absent_fields_render_na() {
        let t = Target::new("i-1", "ec2-user");
        let md = E2eReport::new(&[t], at()).to_markdown();
        let row = md.lines().last().unwrap();
        assert_eq!(
            row,
            "| i-1 | Unknown | Unknown | N/A | N/A | N/A | N/A | PENDING | PENDING | PENDING |"
        );
    }

    #[test]
    fn pipes_in_names_are_escaped() {
        let t = Target::new("i-1", "u").with_name("a|b");
        let md = E2eReport::new(&[t], at()).to_markdown();
        assert!(md.contains("| a\\|b |"));
    }

    #[test]
    fn all_passed_needs_every_target() {
        let mut a = Target::new("i-1", "u").with_ipv4(Ipv4Addr::new(203, 0, 113, 1));
        a.overall = Status::Pass;
        let mut b = a.clone();
        b.id = "i-2".into();
        assert!(E2eReport::new(&[a.clone(), b.clone()], at()).all_passed());

        b.overall = Status::ConfigMissing;
        let report = E2eReport::new(&[a, b], at());
        assert!(!report.all_passed());
        assert_eq!(report.count(Status::ConfigMissing), 1);
        assert!(!E2eReport::new(&[], at()).all_passed());
    }

    #[test]
    fn rendering_is_deterministic() {
        let targets = vec![Target::new("i-1", "u"), Target::new("i-2", "u")];
        let a = E2eReport::new(&targets, at()).to_markdown();
        let b = E2eReport::new(&targets, at()).to_markdown();
        assert_eq!(a, b);
    }

    #[test]
    fn save_markdown_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/report.md");
        E2eReport::new(&[Target::new("i-1", "u")], at())
            .save_markdown(&path)
            .unwrap();
        E2eReport::new(&[Target::new("i-2", "u")], at())
            .save_markdown(&path)
            .unwrap();
        let md = std::fs::read_to_string(&path).unwrap();
        assert!(md.contains("| i-2 |"));
        assert!(!md.contains("| i-1 |"));
    }
}
