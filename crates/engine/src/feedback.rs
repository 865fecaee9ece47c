//! Delivery feedback: per-service push counters and invalid-recipient reports.
//!
//! Both sinks are called from worker tasks and must return quickly; they only
//! take a short, uncontended lock and never await.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Default number of invalid-token reports held until drained.
pub const DEFAULT_FEEDBACK_CAPACITY: usize = 10_000;

/// Sink for delivery metrics and recipient invalidation signals.
pub trait FeedbackCollector: Send + Sync {
    /// Record the outcome and latency of one delivery attempt.
    fn count_push(&self, service_id: &str, success: bool, duration: Duration);

    /// Record a recipient that should no longer be targeted.
    /// Duplicate reports are harmless.
    fn token_invalid(&self, service_id: &str, token: &str);
}

/// Aggregated push counters for one service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PushStats {
    pub pushed: u64,
    pub failed: u64,
    pub total_latency_ms: u64,
}

/// A recipient reported as permanently invalid by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidToken {
    pub service: String,
    pub token: String,
    pub reported_at: DateTime<Utc>,
}

/// In-memory feedback collector.
///
/// Invalid-token reports are buffered until drained by the feedback endpoint;
/// past `capacity` the oldest report is evicted.
pub struct Feedback {
    stats: Mutex<BTreeMap<String, PushStats>>,
    invalid: Mutex<VecDeque<InvalidToken>>,
    capacity: usize,
}

impl Feedback {
    pub fn new(capacity: usize) -> Self {
        Self {
            stats: Mutex::new(BTreeMap::new()),
            invalid: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Snapshot of the counters of every service that has pushed.
    pub fn stats(&self) -> BTreeMap<String, PushStats> {
        lock(&self.stats).clone()
    }

    /// Take every buffered invalid-token report.
    pub fn drain_invalid_tokens(&self) -> Vec<InvalidToken> {
        lock(&self.invalid).drain(..).collect()
    }

    pub fn pending_invalid_tokens(&self) -> usize {
        lock(&self.invalid).len()
    }
}

impl Default for Feedback {
    fn default() -> Self {
        Self::new(DEFAULT_FEEDBACK_CAPACITY)
    }
}

impl FeedbackCollector for Feedback {
    fn count_push(&self, service_id: &str, success: bool, duration: Duration) {
        let mut stats = lock(&self.stats);
        let entry = stats.entry(service_id.to_string()).or_default();
        if success {
            entry.pushed += 1;
        } else {
            entry.failed += 1;
        }
        entry.total_latency_ms += duration.as_millis() as u64;
    }

    fn token_invalid(&self, service_id: &str, token: &str) {
        tracing::info!(service = service_id, token, "Recipient token reported invalid");

        let mut invalid = lock(&self.invalid);
        if invalid.len() >= self.capacity {
            invalid.pop_front();
            tracing::warn!(
                capacity = self.capacity,
                "Invalid-token buffer full, evicting oldest report"
            );
        }
        invalid.push_back(InvalidToken {
            service: service_id.to_string(),
            token: token.to_string(),
            reported_at: Utc::now(),
        });
    }
}

// A panicking holder leaves the counters usable; they stay consistent per update.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
