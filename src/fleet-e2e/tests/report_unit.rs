//! Unit tests for E2E report types
use chrono::Utc;
use fleet_e2e::report::E2eReport;
use fleet_e2e::{Status, Target};
use std::net::Ipv4Addr;

fn targets() -> Vec<Target> {
    let mut a = Target::new("i-a", "ubuntu")
        .with_ipv4(Ipv4Addr::new(203, 0, 113, 10))
        .with_name("ubuntu-24");
    a.ipv4_result = Status::Pass;
    a.vpn_ipv4 = Some(Ipv4Addr::new(203, 0, 113, 10));
    a.overall = Status::Pass;

    let mut b = Target::new("i-b", "ec2-user").with_ipv4(Ipv4Addr::new(198, 51, 100, 7));
    b.overall = Status::Unreachable;

    let mut c = Target::new("i-c", "admin")
        .with_ipv4(Ipv4Addr::new(192, 0, 2, 1))
        .with_ipv6("2001:db8::1".parse().unwrap());
    c.overall = Status::ConfigMissing;

    vec![a, b, c]
}

#[test]
fn e2e_report_serializes() {
    let report = E2eReport::new(&targets(), Utc::now());

    let json = serde_json::to_string(&report).unwrap();
    assert!(json.contains("\"UNREACHABLE\""));
    let back: E2eReport = serde_json::from_str(&json).unwrap();
    assert_eq!(back.targets.len(), 3);
    assert_eq!(back.targets[2].overall, Status::ConfigMissing);
}

#[test]
fn markdown_has_one_row_per_target_in_order() {
    let md = E2eReport::new(&targets(), Utc::now()).to_markdown();
    let rows: Vec<&str> = md
        .lines()
        .filter(|l| l.starts_with("| i-"))
        .collect();

    assert_eq!(rows.len(), 3);
    assert!(rows[0].starts_with("| i-a |"));
    assert!(rows[1].starts_with("| i-b |"));
    assert!(rows[2].starts_with("| i-c |"));

    for row in &rows {
        assert_eq!(row.matches(" | ").count(), 9, "{row}");
        assert!(!row.contains("|  |"), "empty cell in {row}");
        assert!(!row.contains("None"), "null token in {row}");
    }
    assert_eq!(
        rows[1],
        "| i-b | Unknown | Unknown | 198.51.100.7 | N/A | N/A | N/A | PENDING | PENDING | UNREACHABLE |"
    );
    assert_eq!(
        rows[2],
        "| i-c | Unknown | Unknown | 192.0.2.1 | 2001:db8::1 | N/A | N/A | PENDING | PENDING | CONFIG_MISSING |"
    );
}

#[test]
fn e2e_report_tracks_pass_fail() {
    let report = E2eReport::new(&targets(), Utc::now());
    assert_eq!(report.passed(), 1);
    assert_eq!(report.count(Status::Unreachable), 1);
    assert!(!report.all_passed());
}
