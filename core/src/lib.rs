//! Core types shared by the edgepick probing funnel.

pub mod config;
pub mod ratelimiter;
pub mod score;

use async_trait::async_trait;
use serde::{Serialize, Serializer};
use std::fmt;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

pub use config::SelectorConfig;
pub use score::{score, score_measurement};

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Latency reported for a probe that errored or timed out.
pub const SENTINEL_LATENCY_MS: f64 = 9999.0;
/// Loss reported for a probe that errored or timed out.
pub const SENTINEL_LOSS_PERCENT: u8 = 100;

/// A /24-equivalent address group. `mask` is the prefix length of the range the
/// block was derived from; host expansion always treats the block as a /24.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CandidateBlock {
    pub address: Ipv4Addr,
    pub mask: u8,
}

impl CandidateBlock {
    /// Build a block from any address inside it; the last octet is zeroed.
    pub fn containing(addr: Ipv4Addr, mask: u8) -> Self {
        let [a, b, c, _] = addr.octets();
        CandidateBlock { address: Ipv4Addr::new(a, b, c, 0), mask }
    }
}

impl fmt::Display for CandidateBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.mask)
    }
}

impl Serialize for CandidateBlock {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Outcome of one latency/loss probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Measurement {
    Measured { avg_latency_ms: f64, loss_percent: u8 },
    /// The probe ran but its output carried no loss figure. Never ranked.
    Unmeasurable,
}

impl Measurement {
    /// Worst-case stand-in for a probe that failed outright. Still rankable.
    pub const fn sentinel() -> Self {
        Measurement::Measured { avg_latency_ms: SENTINEL_LATENCY_MS, loss_percent: SENTINEL_LOSS_PERCENT }
    }

    /// Clamps loss into [0, 100].
    pub fn measured(avg_latency_ms: f64, loss_percent: u32) -> Self {
        Measurement::Measured { avg_latency_ms, loss_percent: loss_percent.min(100) as u8 }
    }

    pub fn latency_ms(&self) -> Option<f64> {
        match self {
            Measurement::Measured { avg_latency_ms, .. } => Some(*avg_latency_ms),
            Measurement::Unmeasurable => None,
        }
    }

    pub fn loss_percent(&self) -> Option<u8> {
        match self {
            Measurement::Measured { loss_percent, .. } => Some(*loss_percent),
            Measurement::Unmeasurable => None,
        }
    }

    pub fn is_measured(&self) -> bool {
        matches!(self, Measurement::Measured { .. })
    }
}

/// A host that went through the second funnel stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredCandidate {
    #[serde(rename = "ip")]
    pub address: Ipv4Addr,
    pub score: f64,
    #[serde(rename = "avg_delay")]
    pub avg_latency_ms: f64,
    #[serde(rename = "loss_rate")]
    pub loss_percent: u8,
}

/// Result of a full funnel run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Selection {
    pub top_hosts: Vec<ScoredCandidate>,
    pub top_blocks: Vec<CandidateBlock>,
}

/// Measurement capability the funnel depends on.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// One latency/loss measurement. Must not fail; errors map to
    /// [`Measurement::sentinel`].
    async fn probe(&self, addr: Ipv4Addr) -> Measurement;

    /// [`Prober::probe`] plus its wall-clock duration.
    async fn probe_timed(&self, addr: Ipv4Addr) -> (Measurement, Duration) {
        let started = Instant::now();
        let m = self.probe(addr).await;
        (m, started.elapsed())
    }

    /// Whether `port` accepts a connection within `timeout`.
    async fn check_port(&self, addr: Ipv4Addr, port: u16, timeout: Duration) -> bool;
}

/// Reasons a run halts with an empty result.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SelectError {
    #[error("no address ranges supplied")]
    NoRanges,
    #[error("address ranges expanded to no candidate blocks")]
    NoCandidates,
    #[error("none of the {0} candidate blocks produced a usable measurement")]
    NoMeasurableBlocks(usize),
}

/// Per-task failure inside the probe pool.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("probe task failed: {0}")]
    TaskFailed(String),
    #[error("probe task never reported a result")]
    Lost,
}
