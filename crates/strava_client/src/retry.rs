use rand::{Rng, rng};
use std::time::Duration;

/// A simple retry policy with exponential backoff and jitter.
///
/// The default performs no retries at all.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Run `f` until it succeeds, the error is not retryable, or the retry budget is spent.
    pub async fn retry_async<F, Fut, T, E, P>(&self, mut f: F, retryable: P) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 0u32;
        loop {
            match f().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    attempt += 1;
                    if attempt > self.max_retries || !retryable(&e) {
                        return Err(e);
                    }
                    tokio::time::sleep(self.backoff(attempt)).await;
                }
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        // exponential backoff with full jitter
        let max_delay = self.base_delay.saturating_mul(1u32 << attempt.min(16));
        let max_ms = max_delay.as_millis().max(1) as u64;
        Duration::from_millis(rng().random_range(0..max_ms))
    }
}
