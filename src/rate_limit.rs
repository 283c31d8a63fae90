//! Request pacing.
//!
//! Three kinds of suspension, all derived from one base delay:
//!
//! ```text
//! between requests in a batch   base_delay
//! between batches               2 * base_delay
//! before retry attempt n        n * base_delay   (linear backoff)
//! ```
//!
//! An optional jitter of `0..=jitter` is added to every suspension. It
//! defaults to zero.

use rand::{Rng, rng};
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiter {
    base_delay: Duration,
    jitter: Duration,
}

impl RateLimiter {
    pub fn new(base_delay: Duration) -> Self {
        Self {
            base_delay,
            jitter: Duration::ZERO,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retrying after failed attempt number `attempt` (1-based).
    pub fn retry_delay(&self, attempt: usize) -> Duration {
        self.base_delay
            .saturating_mul(u32::try_from(attempt).unwrap_or(u32::MAX))
    }

    pub fn inter_batch_delay(&self) -> Duration {
        self.base_delay.saturating_mul(2)
    }

    /// Pause between two sequential requests.
    pub async fn wait(&self) {
        self.suspend(self.base_delay).await;
    }

    /// Linear backoff before the next retry.
    pub async fn wait_retry(&self, attempt: usize) {
        let delay = self.retry_delay(attempt);
        debug!(attempt, ?delay, "Backing off before retry");
        self.suspend(delay).await;
    }

    /// Pause between two batches.
    pub async fn inter_batch_wait(&self) {
        let delay = self.inter_batch_delay();
        debug!(?delay, "Waiting between batches");
        self.suspend(delay).await;
    }

    async fn suspend(&self, delay: Duration) {
        let delay = delay + self.jitter_sample();
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }

    fn jitter_sample(&self) -> Duration {
        let max_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rng().random_range(0..=max_ms))
    }
}
