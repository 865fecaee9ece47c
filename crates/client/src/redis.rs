use ::redis::AsyncCommands;
use ::redis::aio::ConnectionManager;
use async_trait::async_trait;

use pushgate_common::error::AppError;
use pushgate_common::redis_pool::{create_redis_client, create_redis_pool};
use pushgate_common::types::queue_name;

use crate::Client;

/// Pushes directly onto the queues the gateway's Redis backend consumes.
///
/// Payloads are not validated; anything the service cannot convert is
/// dropped by the worker that pops it.
#[derive(Clone)]
pub struct RedisClient {
    manager: ConnectionManager,
}

impl RedisClient {
    pub async fn connect(redis_url: &str, password: Option<&str>) -> Result<Self, AppError> {
        let client = create_redis_client(redis_url, password)
            .map_err(|e| AppError::Config(format!("Invalid Redis URL: {}", e)))?;
        let manager = create_redis_pool(client)
            .await
            .map_err(|e| AppError::Queue(format!("Connecting to Redis: {}", e)))?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl Client for RedisClient {
    async fn push_raw(&self, service_id: &str, data: &[u8]) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        let _: i64 = conn.rpush(queue_name(service_id), data).await?;
        tracing::debug!(service = service_id, bytes = data.len(), "Pushed to Redis queue");
        Ok(())
    }
}
