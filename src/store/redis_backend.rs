use super::{Lookup, RecordStore, StoreError};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::{info, trace};

/// Redis-backed record store.
///
/// Holds a `ConnectionManager`, a multiplexed connection that reconnects on
/// its own. Each lookup works on a cheap clone of it, so concurrent requests
/// pipeline over the same connection instead of queueing behind a lock.
#[derive(Clone)]
pub struct RedisStore {
    client: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| StoreError::Fatal(format!("Failed to create Redis client: {}", e)))?;

        let connection_manager = ConnectionManager::new(client).await?;
        info!("Connected to Redis record store");

        Ok(Self {
            client: connection_manager,
        })
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.client.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for RedisStore {
    async fn get(&self, key: &str) -> Lookup {
        let mut conn = self.client.clone();
        let result: redis::RedisResult<Option<String>> = conn.get(key).await;

        match result {
            Ok(Some(value)) => {
                trace!("Redis hit for key: {}", key);
                Lookup::Found(value)
            }
            Ok(None) => {
                trace!("Redis miss for key: {}", key);
                Lookup::Absent
            }
            Err(e) => Lookup::Failed(e.into()),
        }
    }
}
