use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Token bucket pacing probe launches. Holds at most `burst` unused tokens.
pub struct RateLimiter {
    sem: Arc<Semaphore>,
}

impl Clone for RateLimiter {
    fn clone(&self) -> Self { RateLimiter { sem: self.sem.clone() } }
}

impl RateLimiter {
    /// Must be called inside a tokio runtime.
    pub fn new(tokens_per_sec: u32) -> Self {
        let tokens_per_sec = tokens_per_sec.max(1);
        let sem = Arc::new(Semaphore::new(0));
        let weak: Weak<Semaphore> = Arc::downgrade(&sem);
        // Above a million tokens per second the period would round to zero.
        let interval = Duration::from_micros(1_000_000 / u64::from(tokens_per_sec)).max(Duration::from_micros(1));
        let burst = tokens_per_sec as usize;
        // Refill until every clone of the limiter is gone.
        tokio::spawn(async move {
            let mut t = tokio::time::interval(interval);
            t.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                t.tick().await;
                let Some(sem) = weak.upgrade() else { break };
                if sem.available_permits() < burst {
                    sem.add_permits(1);
                }
            }
        });
        RateLimiter { sem }
    }

    pub async fn acquire(&self) {
        if let Ok(permit) = self.sem.acquire().await {
            permit.forget();
        }
    }
}
