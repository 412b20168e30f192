//! Fixed-size worker pool fed from a job channel.

use edgepick_core::ratelimiter::RateLimiter;
use edgepick_core::PoolError;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Runs one unit of work per candidate with at most `workers` in flight.
pub struct ProbePool {
    workers: usize,
    limiter: Option<RateLimiter>,
}

impl ProbePool {
    pub fn new(workers: usize) -> Self {
        ProbePool { workers: workers.max(1), limiter: None }
    }

    /// Pace task launches through a shared token bucket.
    pub fn with_rate_limit(mut self, limiter: RateLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn workers(&self) -> usize { self.workers }

    /// Run `work` over every candidate and key the results by candidate.
    ///
    /// Each invocation runs in its own task: a panic becomes
    /// [`PoolError::TaskFailed`] for that candidate and the rest carry on.
    /// Collection happens in completion order; callers sort afterwards.
    pub async fn run_all<C, R, F, Fut>(&self, candidates: Vec<C>, work: F) -> HashMap<C, Result<R, PoolError>>
    where
        C: Eq + Hash + Clone + Send + 'static,
        R: Send + 'static,
        F: Fn(C) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        let mut out = HashMap::with_capacity(candidates.len());
        if candidates.is_empty() {
            return out;
        }

        let (job_tx, job_rx) = mpsc::channel::<C>(candidates.len());
        for c in candidates.iter().cloned() {
            // Capacity covers every job, so this never waits.
            let _ = job_tx.send(c).await;
        }
        drop(job_tx);

        let jobs = Arc::new(Mutex::new(job_rx));
        let work = Arc::new(work);
        let (res_tx, mut res_rx) = mpsc::unbounded_channel::<(C, Result<R, PoolError>)>();

        for _ in 0..self.workers.min(candidates.len()) {
            let jobs = jobs.clone();
            let work = work.clone();
            let res_tx = res_tx.clone();
            let limiter = self.limiter.clone();
            tokio::spawn(async move {
                loop {
                    let next = jobs.lock().await.recv().await;
                    let Some(c) = next else { break };
                    if let Some(l) = &limiter { l.acquire().await; }
                    let res = tokio::spawn((*work)(c.clone()))
                        .await
                        .map_err(|e| PoolError::TaskFailed(e.to_string()));
                    if res_tx.send((c, res)).is_err() { break; }
                }
            });
        }
        drop(res_tx);

        while let Some((c, r)) = res_rx.recv().await {
            out.insert(c, r);
        }
        for c in candidates {
            out.entry(c).or_insert(Err(PoolError::Lost));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn every_candidate_gets_a_result() {
        let pool = ProbePool::new(4);
        let res = pool.run_all((0u32..100).collect(), |n| async move { n * 2 }).await;
        assert_eq!(res.len(), 100);
        for n in 0u32..100 {
            assert_eq!(res[&n], Ok(n * 2));
        }
    }

    #[tokio::test]
    async fn empty_input_is_empty_output() {
        let pool = ProbePool::new(4);
        let res = pool.run_all(Vec::<u8>::new(), |n| async move { n }).await;
        assert!(res.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn in_flight_never_exceeds_bound() {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let pool = ProbePool::new(5);
        let (cur, pk) = (current.clone(), peak.clone());
        let res = pool
            .run_all((0u32..40).collect(), move |_| {
                let (cur, pk) = (cur.clone(), pk.clone());
                async move {
                    let now = cur.fetch_add(1, Ordering::SeqCst) + 1;
                    pk.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    cur.fetch_sub(1, Ordering::SeqCst);
                }
            })
            .await;
        assert_eq!(res.len(), 40);
        assert!(peak.load(Ordering::SeqCst) <= 5);
        assert!(peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn panic_is_isolated_to_its_candidate() {
        let pool = ProbePool::new(3);
        let res = pool
            .run_all((0u32..10).collect(), |n| async move {
                if n == 4 { panic!("boom"); }
                n
            })
            .await;
        assert_eq!(res.len(), 10);
        assert!(matches!(res[&4], Err(PoolError::TaskFailed(_))));
        assert_eq!(res.values().filter(|r| r.is_ok()).count(), 9);
    }

    #[tokio::test]
    async fn rate_limited_pool_still_completes() {
        let pool = ProbePool::new(8).with_rate_limit(RateLimiter::new(1000));
        let res = pool.run_all((0u8..10).collect(), |n| async move { n }).await;
        assert_eq!(res.len(), 10);
    }

    #[tokio::test]
    async fn very_high_rate_limit_does_not_stall() {
        let pool = ProbePool::new(4).with_rate_limit(RateLimiter::new(2_000_000));
        let res = tokio::time::timeout(Duration::from_secs(3), pool.run_all((0u8..4).collect(), |n| async move { n }))
            .await
            .expect("pool stalled");
        assert_eq!(res.len(), 4);
    }

    #[test]
    fn zero_workers_means_one() {
        assert_eq!(ProbePool::new(0).workers(), 1);
    }
}
