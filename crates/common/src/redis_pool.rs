use redis::aio::ConnectionManager;
use redis::{Client, IntoConnectionInfo};

/// Open a Redis client, overriding the URL's password when one is given.
pub fn create_redis_client(redis_url: &str, password: Option<&str>) -> anyhow::Result<Client> {
    let mut info = redis_url.into_connection_info()?;
    if let Some(password) = password {
        info.redis.password = Some(password.to_string());
    }
    Ok(Client::open(info)?)
}

/// Create a Redis connection manager for async operations.
pub async fn create_redis_pool(client: Client) -> anyhow::Result<ConnectionManager> {
    let manager = ConnectionManager::new(client).await?;

    tracing::info!("Connected to Redis");
    Ok(manager)
}
