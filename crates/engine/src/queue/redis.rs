use std::sync::Arc;

use ::redis::aio::{ConnectionManager, MultiplexedConnection};
use ::redis::{AsyncCommands, Client};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use pushgate_common::error::AppError;
use pushgate_common::redis_pool::create_redis_pool;
use pushgate_common::types::queue_name;

use super::{Queue, QueueFactory};

/// Server-side `BLPOP` timeout. Bounds how long a blocked pop takes to
/// notice cancellation.
const POP_TIMEOUT_SECS: u64 = 1;

/// Idle blocking connections kept per queue.
const MAX_IDLE_CONNECTIONS: usize = 8;

/// Durable queue backend on Redis lists, shared across gateway instances.
pub struct RedisQueueFactory {
    client: Client,
    manager: ConnectionManager,
}

impl RedisQueueFactory {
    pub async fn new(client: Client) -> Result<Self, AppError> {
        let manager = create_redis_pool(client.clone())
            .await
            .map_err(|e| AppError::Queue(format!("Connecting to Redis: {}", e)))?;
        Ok(Self { client, manager })
    }
}

#[async_trait]
impl QueueFactory for RedisQueueFactory {
    async fn new_queue(&self, service_id: &str) -> Result<Arc<dyn Queue>, AppError> {
        Ok(Arc::new(RedisQueue {
            name: queue_name(service_id),
            client: self.client.clone(),
            manager: self.manager.clone(),
            idle: Mutex::new(Vec::new()),
        }))
    }
}

/// One service's Redis list. Producers `RPUSH`, consumers `BLPOP`.
///
/// `BLPOP` blocks its connection, so each concurrent consumer borrows a
/// dedicated connection from a small idle pool instead of sharing the
/// multiplexed manager used for pushes.
pub struct RedisQueue {
    name: String,
    client: Client,
    manager: ConnectionManager,
    idle: Mutex<Vec<MultiplexedConnection>>,
}

impl RedisQueue {
    async fn checkout(&self) -> Result<MultiplexedConnection, AppError> {
        if let Some(conn) = self.idle.lock().await.pop() {
            return Ok(conn);
        }
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    async fn checkin(&self, conn: MultiplexedConnection) {
        let mut idle = self.idle.lock().await;
        if idle.len() < MAX_IDLE_CONNECTIONS {
            idle.push(conn);
        }
    }
}

#[async_trait]
impl Queue for RedisQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn push(&self, payload: Vec<u8>) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        conn.rpush::<_, _, ()>(&self.name, payload).await?;
        Ok(())
    }

    async fn pop(&self, cancel: &CancellationToken) -> Result<Option<Vec<u8>>, AppError> {
        let mut conn = self.checkout().await?;
        loop {
            // The BLPOP itself is never abandoned mid-flight: dropping it could
            // discard an item Redis already removed from the list.
            if cancel.is_cancelled() {
                self.checkin(conn).await;
                return Ok(None);
            }
            let popped: Option<(String, Vec<u8>)> =
                conn.blpop(&self.name, POP_TIMEOUT_SECS as f64).await?;
            let Some((_, payload)) = popped else {
                continue;
            };
            if cancel.is_cancelled() {
                // Signalled while blocked: put the item back at the head.
                conn.lpush::<_, _, ()>(&self.name, payload).await?;
                self.checkin(conn).await;
                return Ok(None);
            }
            self.checkin(conn).await;
            return Ok(Some(payload));
        }
    }

    async fn len(&self) -> Result<usize, AppError> {
        let mut conn = self.manager.clone();
        Ok(conn.llen(&self.name).await?)
    }
}
