use std::time::Duration;

/// Knobs for one funnel run. Nothing in the funnel hardwires these values.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectorConfig {
    /// Concurrent probes in the host stage.
    pub workers: usize,
    /// Concurrent probes in the block stage. Not tied to `workers` once built;
    /// [`SelectorConfig::with_workers`] derives it as half.
    pub block_workers: usize,
    pub ping_count: u32,
    /// Wait for each echo reply.
    pub ping_wait: Duration,
    /// Bound on one whole latency/loss probe.
    pub probe_timeout: Duration,
    pub port_timeout: Duration,
    pub port: u16,
    pub top_blocks: usize,
    pub top_hosts: usize,
    /// Optional cap on probe launches per second; `None` disables pacing.
    pub qps: Option<u32>,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        SelectorConfig {
            workers: 50,
            block_workers: 25,
            ping_count: 3,
            ping_wait: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(3),
            port_timeout: Duration::from_secs(2),
            port: 443,
            top_blocks: 5,
            top_hosts: 15,
            qps: None,
        }
    }
}

impl SelectorConfig {
    /// Defaults with the host stage `workers` wide and the block stage half that.
    pub fn with_workers(workers: usize) -> Self {
        let workers = workers.max(1);
        SelectorConfig { workers, block_workers: (workers / 2).max(1), ..SelectorConfig::default() }
    }
}
