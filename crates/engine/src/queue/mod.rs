//! FIFO byte queues, one per registered service.
//!
//! Two interchangeable backends sit behind [`QueueFactory`]: a volatile
//! in-process list ([`memory`]) and a durable Redis list ([`redis`]) shared by
//! every gateway instance and producer. A pop removes the item atomically with
//! handing it to the caller, so an item is never in flight twice; a consumer
//! that dies after popping loses the item.

pub mod memory;
pub mod redis;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use pushgate_common::error::AppError;
use pushgate_common::redis_pool::create_redis_client;

pub use self::memory::{MemoryQueue, MemoryQueueFactory};
pub use self::redis::{RedisQueue, RedisQueueFactory};

/// A named FIFO of raw payloads.
#[async_trait]
pub trait Queue: Send + Sync {
    fn name(&self) -> &str;

    /// Append a payload to the tail.
    async fn push(&self, payload: Vec<u8>) -> Result<(), AppError>;

    /// Remove and return the head, waiting until one is available.
    ///
    /// Returns `Ok(None)` once `cancel` fires. Safe to call from many
    /// consumers at once; every item is handed to exactly one of them.
    async fn pop(&self, cancel: &CancellationToken) -> Result<Option<Vec<u8>>, AppError>;

    async fn len(&self) -> Result<usize, AppError>;
}

/// Builds the queue of a service from its identity.
#[async_trait]
pub trait QueueFactory: Send + Sync {
    async fn new_queue(&self, service_id: &str) -> Result<Arc<dyn Queue>, AppError>;
}

/// Pick the durable backend when a Redis URL is configured, the volatile one
/// otherwise.
pub async fn select_factory(
    redis_url: Option<&str>,
    redis_password: Option<&str>,
) -> Result<Arc<dyn QueueFactory>, AppError> {
    match redis_url {
        Some(url) => {
            let client = create_redis_client(url, redis_password)
                .map_err(|e| AppError::Config(format!("Invalid queue Redis URL: {}", e)))?;
            tracing::info!(url, "Using Redis queue");
            Ok(Arc::new(RedisQueueFactory::new(client).await?))
        }
        None => {
            tracing::info!("Using non-persistent in-memory queue");
            Ok(Arc::new(MemoryQueueFactory))
        }
    }
}
