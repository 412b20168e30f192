//! Latency/loss via the system `ping` binary.

use edgepick_core::Measurement;
use regex::Regex;
use std::net::Ipv4Addr;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

fn loss_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)% packet loss").expect("static regex"))
}

fn rtt_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"time[=<](\d+(?:\.\d+)?) ?ms").expect("static regex"))
}

/// Turn `ping` output into a measurement.
///
/// No loss line means the output is not understood and the probe is
/// [`Measurement::Unmeasurable`]. A loss line with no echo times has no mean
/// latency and resolves to the sentinel.
pub fn parse_ping_output(output: &str) -> Measurement {
    let Some(loss) = loss_re().captures(output).and_then(|c| c[1].parse::<f64>().ok()) else {
        return Measurement::Unmeasurable;
    };
    let rtts: Vec<f64> = rtt_re()
        .captures_iter(output)
        .filter_map(|c| c[1].parse::<f64>().ok())
        .collect();
    if rtts.is_empty() {
        return Measurement::sentinel();
    }
    let avg = rtts.iter().sum::<f64>() / rtts.len() as f64;
    Measurement::measured(avg, loss.floor() as u32)
}

/// Argument list for `ping`; macOS takes the reply wait in milliseconds.
pub fn ping_args(addr: Ipv4Addr, count: u32, wait: Duration) -> Vec<String> {
    let wait_arg = if cfg!(target_os = "macos") {
        wait.as_millis().max(1).to_string()
    } else {
        wait.as_secs().max(1).to_string()
    };
    vec!["-c".into(), count.max(1).to_string(), "-W".into(), wait_arg, addr.to_string()]
}

/// Run `ping` with an overall deadline. Spawn failures and timeouts yield the sentinel.
pub async fn run_ping(addr: Ipv4Addr, count: u32, wait: Duration, overall: Duration) -> Measurement {
    let mut cmd = Command::new("ping");
    cmd.args(ping_args(addr, count, wait))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    match timeout(overall, cmd.output()).await {
        Ok(Ok(out)) => parse_ping_output(&String::from_utf8_lossy(&out.stdout)),
        Ok(Err(e)) => {
            debug!(%addr, error = %e, "ping failed to run");
            Measurement::sentinel()
        }
        Err(_) => {
            debug!(%addr, "ping timed out");
            Measurement::sentinel()
        }
    }
}
