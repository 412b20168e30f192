//! Two-stage selection funnel: rank blocks by a representative host, then score every host of the best blocks.

pub mod pool;

use address_expander::{expand_all, expand_block_to_hosts, representative_host};
use edgepick_core::ratelimiter::RateLimiter;
use edgepick_core::{score_measurement, CandidateBlock, Measurement, Prober, ScoredCandidate, SelectError, Selection, SelectorConfig};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub use pool::ProbePool;

pub struct Selector {
    config: SelectorConfig,
    prober: Arc<dyn Prober>,
}

impl Selector {
    pub fn new(config: SelectorConfig, prober: Arc<dyn Prober>) -> Self {
        Selector { config, prober }
    }

    pub fn config(&self) -> &SelectorConfig { &self.config }

    fn pool(&self, workers: usize) -> ProbePool {
        let pool = ProbePool::new(workers);
        match self.config.qps {
            Some(q) if q > 0 => pool.with_rate_limit(RateLimiter::new(q)),
            _ => pool,
        }
    }

    /// Expand raw ranges and run the whole funnel over the resulting blocks.
    pub async fn select_best_candidates<I, S>(&self, ranges: I) -> Result<Selection, SelectError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ranges: Vec<String> = ranges
            .into_iter()
            .map(|r| r.as_ref().trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();
        if ranges.is_empty() {
            return Err(SelectError::NoRanges);
        }
        let blocks: Vec<CandidateBlock> = expand_all(&ranges).into_iter().collect();
        info!(ranges = ranges.len(), blocks = blocks.len(), "expanded address ranges");
        self.select_from_blocks(&blocks).await
    }

    /// Run both stages over blocks that are already expanded (and possibly filtered).
    /// Repeated blocks are probed once. Ties keep the order of `blocks`.
    pub async fn select_from_blocks(&self, blocks: &[CandidateBlock]) -> Result<Selection, SelectError> {
        let mut seen = HashSet::with_capacity(blocks.len());
        let blocks: Vec<CandidateBlock> = blocks.iter().copied().filter(|b| seen.insert(*b)).collect();
        if blocks.is_empty() {
            return Err(SelectError::NoCandidates);
        }
        let ranked = self.rank_blocks(&blocks).await;
        if ranked.is_empty() {
            return Err(SelectError::NoMeasurableBlocks(blocks.len()));
        }
        let top_blocks: Vec<CandidateBlock> = ranked.into_iter().take(self.config.top_blocks).map(|(b, _)| b).collect();
        info!(blocks = %join(&top_blocks), "block stage done");

        let mut top_hosts = self.rank_hosts(&top_blocks).await;
        top_hosts.truncate(self.config.top_hosts);
        info!(hosts = top_hosts.len(), best = ?top_hosts.first().map(|c| c.score), "host stage done");
        Ok(Selection { top_hosts, top_blocks })
    }

    /// Stage one: probe one host per block and order measurable blocks by ascending latency.
    pub async fn rank_blocks(&self, blocks: &[CandidateBlock]) -> Vec<(CandidateBlock, f64)> {
        let started = Instant::now();
        let prober = self.prober.clone();
        let results = self
            .pool(self.config.block_workers)
            .run_all(blocks.to_vec(), move |block: CandidateBlock| {
                let prober = prober.clone();
                async move { prober.probe(representative_host(&block)).await }
            })
            .await;

        let mut ranked = Vec::with_capacity(blocks.len());
        let mut skipped = 0usize;
        for block in blocks {
            match results.get(block) {
                Some(Ok(Measurement::Measured { avg_latency_ms, .. })) => ranked.push((*block, *avg_latency_ms)),
                Some(Ok(Measurement::Unmeasurable)) => skipped += 1,
                Some(Err(e)) => {
                    warn!(%block, error = %e, "block probe failed");
                    skipped += 1;
                }
                None => skipped += 1,
            }
        }
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1));
        debug!(ranked = ranked.len(), skipped, elapsed_ms = started.elapsed().as_millis() as u64, "blocks probed");
        ranked
    }

    /// Stage two: probe and port-check every host of `blocks`, ordered by descending score.
    /// Unmeasurable hosts are left out.
    pub async fn rank_hosts(&self, blocks: &[CandidateBlock]) -> Vec<ScoredCandidate> {
        let started = Instant::now();
        let mut seen = HashSet::new();
        let hosts: Vec<Ipv4Addr> = blocks
            .iter()
            .flat_map(expand_block_to_hosts)
            .filter(|h| seen.insert(*h))
            .collect();

        let prober = self.prober.clone();
        let measurements = self
            .pool(self.config.workers)
            .run_all(hosts.clone(), move |addr: Ipv4Addr| {
                let prober = prober.clone();
                async move { prober.probe(addr).await }
            })
            .await;

        let prober = self.prober.clone();
        let (port, port_timeout) = (self.config.port, self.config.port_timeout);
        let reachability = self
            .pool(self.config.workers)
            .run_all(hosts.clone(), move |addr: Ipv4Addr| {
                let prober = prober.clone();
                async move { prober.check_port(addr, port, port_timeout).await }
            })
            .await;

        let mut scored = Vec::with_capacity(hosts.len());
        for addr in &hosts {
            let m = match measurements.get(addr) {
                Some(Ok(m)) => *m,
                _ => Measurement::Unmeasurable,
            };
            let reachable = matches!(reachability.get(addr), Some(Ok(true)));
            if let (Some(score), Measurement::Measured { avg_latency_ms, loss_percent }) = (score_measurement(&m, reachable), m) {
                scored.push(ScoredCandidate { address: *addr, score, avg_latency_ms, loss_percent });
            }
        }
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        debug!(
            hosts = hosts.len(),
            scored = scored.len(),
            reachable = reachability.values().filter(|r| matches!(r, Ok(true))).count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "hosts probed"
        );
        scored
    }
}

fn join(blocks: &[CandidateBlock]) -> String {
    blocks.iter().map(|b| b.to_string()).collect::<Vec<_>>().join(",")
}
