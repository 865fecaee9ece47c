//! Dispatch core: queues, rate limiting, batching, worker pools and
//! delivery feedback.

pub mod backoff;
pub mod feedback;
pub mod queue;
pub mod rate_limiter;
pub mod service;
pub mod squasher;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;
