use std::{future::Future, time::Duration};

use tokio_retry::{strategy::ExponentialBackoff, Retry};

use crate::types::SnapshotError;

/// Bounded exponential backoff around one unit of work.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    attempts: usize,
    min_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::new(3, Duration::from_secs(4), Duration::from_secs(10))
    }
}

impl RetryPolicy {
    pub fn new(attempts: usize, min_delay: Duration, max_delay: Duration) -> Self {
        RetryPolicy {
            attempts: attempts.max(1),
            min_delay,
            max_delay: max_delay.max(min_delay),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Delays between attempts: `min_delay`, doubling, capped at `max_delay`.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let min = self.min_delay;
        let max = self.max_delay;
        // from_millis(2) yields 2, 4, 8.. times the factor
        let factor = (min.as_millis() as u64 / 2).max(1);
        ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(max)
            .map(move |d| d.clamp(min, max))
            .take(self.attempts - 1)
    }
}

/// Runs `op` until it succeeds or the policy's attempts are used up. The
/// last error is surfaced inside `RetriesExhausted`.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    url: &str,
    mut op: F,
) -> Result<T, SnapshotError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SnapshotError>>,
{
    let mut attempt = 0;
    let total = policy.attempts;
    let res = Retry::spawn(policy.delays(), || {
        attempt += 1;
        let n = attempt;
        let fut = op();
        async move {
            fut.await.map_err(|e| {
                if n < total {
                    warn!("attempt {}/{} for {} failed, backing off: {}", n, total, url, e);
                }
                e
            })
        }
    })
    .await;

    res.map_err(|last| SnapshotError::RetriesExhausted {
        url: url.into(),
        attempts: attempt,
        last: Box::new(last),
    })
}
