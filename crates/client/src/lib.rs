//! Producer clients for the push gateway.
//!
//! [`RedisClient`] writes straight into a service's durable queue, bypassing
//! the ingestion endpoint; [`HttpClient`] goes through `POST /api/push/{service}`
//! and so gets the payload validated before it is queued.

pub mod http;
pub mod redis;

use async_trait::async_trait;

use pushgate_common::error::AppError;

pub use self::http::HttpClient;
pub use self::redis::RedisClient;

#[async_trait]
pub trait Client: Send + Sync {
    /// Hand a raw provider payload to the gateway for `service_id`.
    async fn push_raw(&self, service_id: &str, data: &[u8]) -> Result<(), AppError>;
}
