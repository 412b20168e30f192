//! Probers: one latency/loss measurement and one TCP reachability check per address.

pub mod icmp;
pub mod ping;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use edgepick_core::{Measurement, Prober, SelectorConfig};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

/// Single TCP connect with a timeout. Refused, unreachable and timed-out all count as closed.
pub async fn check_port(addr: Ipv4Addr, port: u16, per_attempt: Duration) -> bool {
    let sa = SocketAddr::new(IpAddr::V4(addr), port);
    matches!(timeout(per_attempt, TcpStream::connect(sa)).await, Ok(Ok(_)))
}

/// Echo settings shared by both backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoSettings {
    pub count: u32,
    pub wait: Duration,
    pub overall: Duration,
}

impl From<&SelectorConfig> for EchoSettings {
    fn from(c: &SelectorConfig) -> Self {
        EchoSettings { count: c.ping_count, wait: c.ping_wait, overall: c.probe_timeout }
    }
}

/// Shells out to the system `ping`.
#[derive(Debug, Clone)]
pub struct SubprocessProber {
    pub echo: EchoSettings,
}

#[async_trait]
impl Prober for SubprocessProber {
    fn name(&self) -> &'static str { "ping" }

    async fn probe(&self, addr: Ipv4Addr) -> Measurement {
        ping::run_ping(addr, self.echo.count, self.echo.wait, self.echo.overall).await
    }

    async fn check_port(&self, addr: Ipv4Addr, port: u16, timeout: Duration) -> bool {
        check_port(addr, port, timeout).await
    }
}

/// Sends echoes from an unprivileged ICMP socket; no process per probe.
#[derive(Debug, Clone)]
pub struct IcmpProber {
    pub echo: EchoSettings,
}

#[async_trait]
impl Prober for IcmpProber {
    fn name(&self) -> &'static str { "icmp" }

    async fn probe(&self, addr: Ipv4Addr) -> Measurement {
        icmp::run_icmp(addr, self.echo.count, self.echo.wait, self.echo.overall).await
    }

    async fn check_port(&self, addr: Ipv4Addr, port: u16, timeout: Duration) -> bool {
        check_port(addr, port, timeout).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbeBackend {
    /// ICMP socket when the host allows it, otherwise `ping`.
    #[default]
    Auto,
    Icmp,
    Ping,
}

impl FromStr for ProbeBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(ProbeBackend::Auto),
            "icmp" => Ok(ProbeBackend::Icmp),
            "ping" => Ok(ProbeBackend::Ping),
            other => Err(anyhow!("unknown probe backend: {}", other)),
        }
    }
}

/// Pick a prober for this host. `Icmp` fails when ICMP sockets are not permitted.
pub fn build_prober(backend: ProbeBackend, cfg: &SelectorConfig) -> Result<Arc<dyn Prober>> {
    let echo = EchoSettings::from(cfg);
    let prober: Arc<dyn Prober> = match backend {
        ProbeBackend::Icmp => {
            if !icmp::available() {
                return Err(anyhow!(
                    "ICMP sockets are not permitted; allow them with `sysctl -w net.ipv4.ping_group_range='0 2147483647'` or use --backend ping"
                ));
            }
            Arc::new(IcmpProber { echo })
        }
        ProbeBackend::Ping => Arc::new(SubprocessProber { echo }),
        ProbeBackend::Auto => {
            if icmp::available() {
                Arc::new(IcmpProber { echo })
            } else {
                debug!("icmp sockets unavailable, falling back to ping");
                Arc::new(SubprocessProber { echo })
            }
        }
    };
    info!(backend = prober.name(), "prober selected");
    Ok(prober)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn open_port_is_reachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });
        assert!(check_port(Ipv4Addr::LOCALHOST, port, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };
        assert!(!check_port(Ipv4Addr::LOCALHOST, port, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn prober_trait_port_check_is_shared() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                if listener.accept().await.is_err() { break; }
            }
        });
        let echo = EchoSettings::from(&SelectorConfig::default());
        let probers: Vec<Arc<dyn Prober>> = vec![Arc::new(SubprocessProber { echo }), Arc::new(IcmpProber { echo })];
        for p in probers {
            assert!(p.check_port(Ipv4Addr::LOCALHOST, port, Duration::from_secs(2)).await, "{}", p.name());
        }
    }

    #[test]
    fn backend_parse() {
        assert_eq!("auto".parse::<ProbeBackend>().unwrap(), ProbeBackend::Auto);
        assert_eq!("ICMP".parse::<ProbeBackend>().unwrap(), ProbeBackend::Icmp);
        assert_eq!("ping".parse::<ProbeBackend>().unwrap(), ProbeBackend::Ping);
        assert!("raw".parse::<ProbeBackend>().is_err());
    }

    #[test]
    fn echo_settings_follow_config() {
        let cfg = SelectorConfig { ping_count: 5, ..SelectorConfig::default() };
        let e = EchoSettings::from(&cfg);
        assert_eq!(e.count, 5);
        assert_eq!(e.wait, Duration::from_secs(1));
        assert_eq!(e.overall, Duration::from_secs(3));
    }

    #[test]
    fn ping_backend_always_builds() {
        let p = build_prober(ProbeBackend::Ping, &SelectorConfig::default()).unwrap();
        assert_eq!(p.name(), "ping");
    }
}
