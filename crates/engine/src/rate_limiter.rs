//! Per-service token bucket shared by all of the service's workers.
//!
//! The bucket holds `rate_max` tokens and every token taken comes back exactly
//! `rate_per` later. Within any window of length `rate_per` at most `rate_max`
//! acquisitions succeed, including windows straddling a refill.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use pushgate_common::types::SquashConfig;

/// Wake-up used when a token's return time is not representable.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

pub struct RateLimiter {
    rate_max: usize,
    rate_per: Duration,
    /// When each token currently out of the bucket was taken, oldest first.
    /// Waiters queue on this mutex, which hands out the lock in FIFO order.
    taken: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(rate_max: u32, rate_per: Duration) -> Self {
        Self {
            rate_max: rate_max as usize,
            rate_per,
            taken: Mutex::new(VecDeque::with_capacity(rate_max as usize)),
        }
    }

    pub fn from_config(config: &SquashConfig) -> Self {
        Self::new(config.rate_max, config.rate_per)
    }

    /// Zero capacity or a zero interval disables gating.
    pub fn is_unlimited(&self) -> bool {
        self.rate_max == 0 || self.rate_per.is_zero()
    }

    /// Wait for a token.
    ///
    /// Returns `false` if `cancel` fires first; no token is consumed then.
    /// Once `cancel` has fired no further tokens are granted.
    pub async fn acquire(&self, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }
        if self.is_unlimited() {
            return true;
        }

        let mut taken = tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            guard = self.taken.lock() => guard,
        };

        loop {
            if cancel.is_cancelled() {
                return false;
            }

            let now = Instant::now();
            while taken
                .front()
                .is_some_and(|&at| now.duration_since(at) >= self.rate_per)
            {
                taken.pop_front();
            }

            if taken.len() < self.rate_max {
                taken.push_back(now);
                return true;
            }

            // Bucket empty: the oldest token returns first.
            let Some(&oldest) = taken.front() else {
                continue;
            };
            let returns_at = oldest
                .checked_add(self.rate_per)
                .unwrap_or_else(|| now + FAR_FUTURE);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep_until(returns_at) => {}
            }
        }
    }
}
