//! Per-target tunnel verification
//!
//! ```text
//! PENDING -> CONFIG_MISSING                       (no client config)
//! PENDING -> TUNNEL_STARTING -> PROBING_V4 [-> PROBING_V6] -> TEARDOWN -> FINAL
//!                      \-> TEST_ERROR -> TEARDOWN  (launch failure / panic)
//! ```

use crate::error::Result;
use crate::probe::{classify, AddressProbe, Classification, Family};
use crate::target::{Status, Target};
use crate::tunnel::{with_tunnel, Tunnel, TunnelSession};
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{error, info};

pub struct TunnelVerifier<'a> {
    tunnel: &'a dyn Tunnel,
    probe: &'a dyn AddressProbe,
    config_dir: PathBuf,
    config_extension: String,
    pid_dir: PathBuf,
    settle: Duration,
}

impl<'a> TunnelVerifier<'a> {
    pub fn new(tunnel: &'a dyn Tunnel, probe: &'a dyn AddressProbe, config_dir: PathBuf) -> Self {
        Self {
            tunnel,
            probe,
            config_dir,
            config_extension: "ovpn".into(),
            pid_dir: std::env::temp_dir(),
            settle: Duration::from_secs(10),
        }
    }

    pub fn config_extension(mut self, ext: impl Into<String>) -> Self {
        self.config_extension = ext.into();
        self
    }

    pub fn pid_dir(mut self, dir: PathBuf) -> Self {
        self.pid_dir = dir;
        self
    }

    /// Wait between tunnel launch and the first probe
    pub fn settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Client config expected for `target`, if it has a dial address
    pub fn config_path(&self, target: &Target) -> Option<PathBuf> {
        let host = target.dial_address()?;
        Some(
            self.config_dir
                .join(format!("{host}.{}", self.config_extension)),
        )
    }

    /// Verify one target in place. Unreachable targets are left untouched.
    pub async fn verify(&self, target: &mut Target) {
        if !target.is_reachable() {
            return;
        }

        let config_path = match self.config_path(target) {
            Some(path) if path.exists() => path,
            other => {
                error!(
                    id = %target.id,
                    path = %other.map(|p| p.display().to_string()).unwrap_or_else(|| "N/A".into()),
                    "Client config not found"
                );
                target.overall = Status::ConfigMissing;
                return;
            }
        };

        info!(id = %target.id, host = ?target.dial_address(), "Testing VPN connectivity");

        let session = TunnelSession::new(&target.id, config_path, &self.pid_dir);
        let id = target.id.clone();
        let result = with_tunnel(self.tunnel, &session, self.probe_families(target)).await;

        if let Err(e) = result {
            error!(%id, error = %e, "VPN session failed");
            target.overall = Status::TestError;
        }
        target.finalize();
        info!(
            %id,
            ipv4 = %target.ipv4_result,
            ipv6 = %target.ipv6_result,
            overall = %target.overall,
            "Verification finished"
        );
    }

    async fn probe_families(&self, target: &mut Target) -> Result<()> {
        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }

        if let Some(expected) = target.public_ipv4 {
            let (status, observed) = self.probe_family(&target.id, Family::V4, expected).await;
            target.ipv4_result = status;
            target.vpn_ipv4 = observed;
        } else {
            target.ipv4_result = Status::TestError;
        }

        // No public IPv6: the result stays PENDING, meaning not applicable.
        if let Some(expected) = target.public_ipv6 {
            let (status, observed) = self.probe_family(&target.id, Family::V6, expected).await;
            target.ipv6_result = status;
            target.vpn_ipv6 = observed;
        }
        Ok(())
    }

    async fn probe_family<A>(&self, id: &str, family: Family, expected: A) -> (Status, Option<A>)
    where
        A: FromStr + PartialEq + Display + Copy,
    {
        let raw = match self.probe.fetch(family).await {
            Ok(raw) => raw,
            Err(e) => {
                error!(%id, %family, error = %e, "Probe failed");
                return (Status::TestError, None);
            }
        };

        let classification = classify(raw.as_str(), expected);
        match &classification {
            Classification::Match(_) => {
                info!(%id, %family, %expected, "SUCCESS: routed correctly")
            }
            Classification::Mismatch(got) => {
                error!(%id, %family, %expected, observed = %got, "FAILURE: unexpected source address")
            }
            Classification::Invalid(body) => {
                error!(%id, %family, response = %body, "Invalid address received")
            }
        }
        (classification.status(), classification.observed().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::E2eError;
    use async_trait::async_trait;
    use std::net::{Ipv4Addr, Ipv6Addr};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeTunnel {
        fail_start: bool,
        starts: AtomicUsize,
        stops: AtomicUsize,
        sessions: Mutex<Vec<TunnelSession>>,
    }

    #[async_trait]
    impl Tunnel for FakeTunnel {
        async fn start(&self, session: &TunnelSession) -> Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.sessions.lock().unwrap().push(session.clone());
            if self.fail_start {
                return Err(E2eError::TunnelLaunch("exit status: 1".into()));
            }
            Ok(())
        }

        async fn stop(&self, _session: &TunnelSession) -> Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    enum Reply {
        Body(&'static str),
        Error,
        Panic,
    }

    struct FakeProbe {
        v4: Reply,
        v6: Reply,
        calls: AtomicUsize,
    }

    impl FakeProbe {
        fn new(v4: Reply, v6: Reply) -> Self {
            Self {
                v4,
                v6,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl AddressProbe for FakeProbe {
        async fn fetch(&self, family: Family) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = match family {
                Family::V4 => &self.v4,
                Family::V6 => &self.v6,
            };
            match reply {
                Reply::Body(s) => Ok(s.to_string()),
                Reply::Error => Err(E2eError::Probe("curl exit status: 28".into())),
                Reply::Panic => panic!("probe blew up"),
            }
        }
    }

    const V4: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 10);

    fn v6() -> Ipv6Addr {
        "2001:db8::10".parse().unwrap()
    }

    fn target() -> Target {
        Target::new("i-0abc", "ec2-user").with_ipv4(V4)
    }

    /// Fetch dir with a client config for 203.0.113.10
    fn fetch_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("203.0.113.10.ovpn"), "client\n").unwrap();
        dir
    }

    fn verifier<'a>(t: &'a FakeTunnel, p: &'a FakeProbe, dir: &Path) -> TunnelVerifier<'a> {
        TunnelVerifier::new(t, p, dir.to_path_buf())
            .pid_dir(dir.to_path_buf())
            .settle(Duration::ZERO)
    }

    #[tokio::test]
    async fn ipv4_only_match_passes() {
        let dir = fetch_dir();
        let tunnel = FakeTunnel::default();
        let probe = FakeProbe::new(Reply::Body("203.0.113.10\n"), Reply::Error);
        let mut t = target();

        verifier(&tunnel, &probe, dir.path()).verify(&mut t).await;

        assert_eq!(t.ipv4_result, Status::Pass);
        assert_eq!(t.ipv6_result, Status::Pending);
        assert_eq!(t.overall, Status::Pass);
        assert_eq!(t.vpn_ipv4, Some(V4));
        assert!(t.vpn_ipv6.is_none());
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
        assert_eq!(tunnel.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn mismatched_ipv4_fails() {
        let dir = fetch_dir();
        let tunnel = FakeTunnel::default();
        let probe = FakeProbe::new(Reply::Body("198.51.100.5"), Reply::Error);
        let mut t = target();

        verifier(&tunnel, &probe, dir.path()).verify(&mut t).await;

        assert_eq!(t.ipv4_result, Status::Fail);
        assert_eq!(t.overall, Status::Fail);
        assert_eq!(t.vpn_ipv4, Some(Ipv4Addr::new(198, 51, 100, 5)));
    }

    #[tokio::test]
    async fn missing_config_never_launches() {
        let dir = tempfile::tempdir().unwrap();
        let tunnel = FakeTunnel::default();
        let probe = FakeProbe::new(Reply::Body("203.0.113.10"), Reply::Error);
        let mut t = target();

        verifier(&tunnel, &probe, dir.path()).verify(&mut t).await;

        assert_eq!(t.overall, Status::ConfigMissing);
        assert_eq!(t.ipv4_result, Status::Pending);
        assert_eq!(t.ipv6_result, Status::Pending);
        assert_eq!(tunnel.starts.load(Ordering::SeqCst), 0);
        assert_eq!(tunnel.stops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn non_address_body_is_test_error() {
        let dir = fetch_dir();
        let tunnel = FakeTunnel::default();
        let probe = FakeProbe::new(Reply::Body("error: timeout"), Reply::Error);
        let mut t = target();

        verifier(&tunnel, &probe, dir.path()).verify(&mut t).await;

        assert_eq!(t.ipv4_result, Status::TestError);
        assert_ne!(t.overall, Status::Pass);
        assert!(t.vpn_ipv4.is_none());
    }

    #[tokio::test]
    async fn probe_error_is_scoped_to_its_family() {
        let dir = fetch_dir();
        let tunnel = FakeTunnel::default();
        let probe = FakeProbe::new(Reply::Error, Reply::Body("2001:db8::10"));
        let mut t = target().with_ipv6(v6());

        verifier(&tunnel, &probe, dir.path()).verify(&mut t).await;

        assert_eq!(t.ipv4_result, Status::TestError);
        assert_eq!(t.ipv6_result, Status::Pass);
        assert_eq!(t.vpn_ipv6, Some(v6()));
        assert_eq!(t.overall, Status::Fail);
        assert_eq!(tunnel.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dual_stack_pass() {
        let dir = fetch_dir();
        let tunnel = FakeTunnel::default();
        let probe = FakeProbe::new(Reply::Body("203.0.113.10"), Reply::Body("2001:db8::10\n"));
        let mut t = target().with_ipv6(v6());

        verifier(&tunnel, &probe, dir.path()).verify(&mut t).await;

        assert_eq!(t.ipv4_result, Status::Pass);
        assert_eq!(t.ipv6_result, Status::Pass);
        assert_eq!(t.overall, Status::Pass);
    }

    #[tokio::test]
    async fn ipv6_mismatch_blocks_pass() {
        let dir = fetch_dir();
        let tunnel = FakeTunnel::default();
        let probe = FakeProbe::new(Reply::Body("203.0.113.10"), Reply::Body("2001:db8::99"));
        let mut t = target().with_ipv6(v6());

        verifier(&tunnel, &probe, dir.path()).verify(&mut t).await;

        assert_eq!(t.ipv4_result, Status::Pass);
        assert_eq!(t.ipv6_result, Status::Fail);
        assert_eq!(t.overall, Status::Fail);
    }

    #[tokio::test]
    async fn launch_failure_is_test_error_with_teardown() {
        let dir = fetch_dir();
        let tunnel = FakeTunnel {
            fail_start: true,
            ..Default::default()
        };
        let probe = FakeProbe::new(Reply::Body("203.0.113.10"), Reply::Error);
        let mut t = target();

        verifier(&tunnel, &probe, dir.path()).verify(&mut t).await;

        assert_eq!(t.overall, Status::TestError);
        assert_eq!(t.ipv4_result, Status::Pending);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
        assert_eq!(tunnel.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_probe_still_tears_down() {
        let dir = fetch_dir();
        let tunnel = FakeTunnel::default();
        let probe = FakeProbe::new(Reply::Panic, Reply::Error);
        let mut t = target();

        verifier(&tunnel, &probe, dir.path()).verify(&mut t).await;

        assert_eq!(t.overall, Status::TestError);
        assert_eq!(tunnel.starts.load(Ordering::SeqCst), 1);
        assert_eq!(tunnel.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unreachable_target_is_skipped() {
        let dir = fetch_dir();
        let tunnel = FakeTunnel::default();
        let probe = FakeProbe::new(Reply::Body("203.0.113.10"), Reply::Error);
        let mut t = target();
        t.mark_unreachable();

        verifier(&tunnel, &probe, dir.path()).verify(&mut t).await;

        assert_eq!(t.overall, Status::Unreachable);
        assert_eq!(t.ipv4_result, Status::Pending);
        assert_eq!(tunnel.starts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn session_uses_dns_named_config_and_unique_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ec2-1.example.ovpn"), "client\n").unwrap();
        let tunnel = FakeTunnel::default();
        let probe = FakeProbe::new(Reply::Body("203.0.113.10"), Reply::Error);
        let mut t = target().with_dns("ec2-1.example");

        verifier(&tunnel, &probe, dir.path()).verify(&mut t).await;

        let sessions = tunnel.sessions.lock().unwrap();
        assert_eq!(sessions[0].config_path, dir.path().join("ec2-1.example.ovpn"));
        assert_eq!(sessions[0].pid_file, dir.path().join("openvpn_i-0abc.pid"));
    }
}
