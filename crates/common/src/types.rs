use std::time::Duration;

use serde::Serialize;

/// Prefix shared by every durable queue name.
pub const QUEUE_PREFIX: &str = "pushgate:";

/// Name of the durable list holding raw payloads for a service.
///
/// Producers writing straight to the store and the dispatch server's own
/// consumers both derive the name from here, so they agree without
/// coordination.
pub fn queue_name(service_id: &str) -> String {
    format!("{}{}", QUEUE_PREFIX, service_id)
}

/// Outcome of a single provider call.
///
/// Variants are ordered from best to worst so that the outcome of a batch
/// can be folded with [`PushStatus::worst`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PushStatus {
    /// Delivered.
    Success,
    /// Transient upstream condition (5xx, network timeout).
    TempFail,
    /// Permanent rejection; the item is dropped.
    HardFail,
}

impl PushStatus {
    pub fn is_success(self) -> bool {
        self == PushStatus::Success
    }

    /// The worse of two outcomes.
    pub fn worst(self, other: PushStatus) -> PushStatus {
        self.max(other)
    }
}

impl std::fmt::Display for PushStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PushStatus::Success => write!(f, "success"),
            PushStatus::TempFail => write!(f, "temp_fail"),
            PushStatus::HardFail => write!(f, "hard_fail"),
        }
    }
}

/// Per-service rate limiting and batching parameters.
///
/// `rate_max == 0` or a zero `rate_per` means unlimited. A zero
/// `squash_window` disables batching; `squash_max == 0` means batches have
/// no size cap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SquashConfig {
    pub rate_max: u32,
    pub rate_per: Duration,
    pub squash_window: Duration,
    pub squash_max: usize,
}

impl SquashConfig {
    /// Rate limited to `rate_max` pushes every `rate_per`, no batching.
    pub fn rate(rate_max: u32, rate_per: Duration) -> Self {
        Self {
            rate_max,
            rate_per,
            ..Self::default()
        }
    }

    /// Enable batching with the given window and size cap.
    pub fn with_squash(mut self, window: Duration, max: usize) -> Self {
        self.squash_window = window;
        self.squash_max = max;
        self
    }

    pub fn is_rate_limited(&self) -> bool {
        self.rate_max > 0 && !self.rate_per.is_zero()
    }

    pub fn is_squashing(&self) -> bool {
        !self.squash_window.is_zero()
    }
}
