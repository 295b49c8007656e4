use std::{
    collections::{HashMap, VecDeque},
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::time::{sleep, Instant};

use crate::types::SnapshotError;

pub const MIN_RATE_LIMIT: u32 = 10;
pub const MAX_RATE_LIMIT: u32 = 60;
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

const SUCCESS_THRESHOLD: u32 = 10;
const FAILURE_THRESHOLD: u32 = 2;

/// Request budget of one host. `current_limit` always stays within
/// `[MIN_RATE_LIMIT, MAX_RATE_LIMIT]`.
#[derive(Debug, Clone)]
pub struct DomainRateState {
    pub domain: String,
    pub current_limit: u32,
    pub success_streak: u32,
    pub failure_streak: u32,
    granted: VecDeque<Instant>,
}

impl DomainRateState {
    fn new(domain: &str, limit: u32) -> Self {
        DomainRateState {
            domain: domain.into(),
            current_limit: limit.clamp(MIN_RATE_LIMIT, MAX_RATE_LIMIT),
            success_streak: 0,
            failure_streak: 0,
            granted: VecDeque::new(),
        }
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.granted.front() {
            if now.duration_since(*oldest) >= window {
                self.granted.pop_front();
            } else {
                break;
            }
        }
    }

    // each streak only resets itself when its own threshold fires
    fn record(&mut self, success: bool) {
        if success {
            self.success_streak += 1;
            if self.success_streak >= SUCCESS_THRESHOLD {
                let raised = ((self.current_limit as f64) * 1.1).floor() as u32;
                self.current_limit = raised.max(self.current_limit + 1).min(MAX_RATE_LIMIT);
                self.success_streak = 0;
                debug!(
                    "raised rate limit of {} to {}/window",
                    self.domain, self.current_limit
                );
            }
        } else {
            self.failure_streak += 1;
            if self.failure_streak >= FAILURE_THRESHOLD {
                self.current_limit = (self.current_limit / 2).max(MIN_RATE_LIMIT);
                self.failure_streak = 0;
                debug!(
                    "lowered rate limit of {} to {}/window",
                    self.domain, self.current_limit
                );
            }
        }
    }
}

/// Proof that a request slot was granted for `domain`.
#[derive(Debug)]
pub struct Permit {
    pub domain: String,
    pub granted_at: Instant,
}

/// Sliding-window limiter keyed by host. Instances are injected where they
/// are needed; every domain entry lives for the lifetime of the limiter.
#[derive(Debug)]
pub struct AdaptiveRateLimiter {
    default_limit: u32,
    window: Duration,
    domains: Mutex<HashMap<String, DomainRateState>>,
}

impl AdaptiveRateLimiter {
    pub fn new(default_limit: u32) -> Self {
        Self::with_window(default_limit, RATE_WINDOW)
    }

    pub fn with_window(default_limit: u32, window: Duration) -> Self {
        AdaptiveRateLimiter {
            default_limit: default_limit.clamp(MIN_RATE_LIMIT, MAX_RATE_LIMIT),
            window,
            domains: Mutex::new(HashMap::new()),
        }
    }

    fn domains(&self) -> MutexGuard<'_, HashMap<String, DomainRateState>> {
        self.domains.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Grants a slot immediately or reports how long until one frees up.
    pub fn try_acquire(&self, domain: &str) -> Result<Permit, SnapshotError> {
        let now = Instant::now();
        let mut domains = self.domains();
        let state = domains
            .entry(domain.to_string())
            .or_insert_with(|| DomainRateState::new(domain, self.default_limit));
        state.prune(now, self.window);

        if state.granted.len() < state.current_limit as usize {
            state.granted.push_back(now);
            return Ok(Permit {
                domain: domain.into(),
                granted_at: now,
            });
        }

        // the window may hold more grants than a freshly lowered limit allows
        let excess = state.granted.len() - state.current_limit as usize;
        let retry_after = match state.granted.get(excess) {
            Some(t) => (*t + self.window).saturating_duration_since(now),
            None => self.window,
        };
        Err(SnapshotError::RateLimitExceeded {
            domain: domain.into(),
            retry_after,
        })
    }

    /// Waits until a slot for `domain` is available.
    pub async fn acquire(&self, domain: &str) -> Permit {
        loop {
            match self.try_acquire(domain) {
                Ok(permit) => return permit,
                Err(SnapshotError::RateLimitExceeded { retry_after, .. }) => {
                    debug!("rate limit reached for {}, waiting {:?}", domain, retry_after);
                    sleep(retry_after).await;
                }
                Err(_) => sleep(self.window).await,
            }
        }
    }

    /// Like `acquire`, but gives up with `RateLimitExceeded` instead of
    /// waiting longer than `max_wait` in total.
    pub async fn acquire_within(
        &self,
        domain: &str,
        max_wait: Duration,
    ) -> Result<Permit, SnapshotError> {
        let deadline = Instant::now() + max_wait;
        loop {
            match self.try_acquire(domain) {
                Ok(permit) => return Ok(permit),
                Err(SnapshotError::RateLimitExceeded { retry_after, .. })
                    if Instant::now() + retry_after <= deadline =>
                {
                    debug!("rate limit reached for {}, waiting {:?}", domain, retry_after);
                    sleep(retry_after).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn record(&self, domain: &str, success: bool) {
        let mut domains = self.domains();
        domains
            .entry(domain.to_string())
            .or_insert_with(|| DomainRateState::new(domain, self.default_limit))
            .record(success);
    }

    pub fn state(&self, domain: &str) -> Option<DomainRateState> {
        self.domains().get(domain).cloned()
    }

    pub fn current_limit(&self, domain: &str) -> u32 {
        self.domains()
            .get(domain)
            .map(|s| s.current_limit)
            .unwrap_or(self.default_limit)
    }
}
