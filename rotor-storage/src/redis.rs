//! Redis backend
//!
//! Each partition maps to one Redis hash; keys are hash fields. Every
//! operation is a single round trip and Redis executes each command
//! atomically on the server, so no client-side locking is needed: two
//! workers racing to claim the same job issue concurrent `HDEL`s and
//! exactly one of them sees a deleted-count of one.

use crate::{Result, Storage, StorageError};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use rotor_core::Partition;
use tracing::debug;

/// Store backed by a shared Redis instance.
#[derive(Clone)]
pub struct RedisStorage {
    connection: MultiplexedConnection,
}

impl RedisStorage {
    /// Connects to the Redis server at `url` (for example
    /// `redis://127.0.0.1/`).
    ///
    /// Connection failures surface as [`StorageError::Unavailable`] so
    /// the embedding application can fall back to a different backend.
    pub async fn connect(url: &str) -> Result<Self> {
        let client =
            redis::Client::open(url).map_err(|e| StorageError::Unavailable(e.to_string()))?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        debug!("connected to the shared redis store");
        Ok(Self { connection })
    }

    /// Wraps an already established connection.
    pub fn from_connection(connection: MultiplexedConnection) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl Storage for RedisStorage {
    async fn get(&self, key: &str, partition: Partition) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection.clone();
        let value: Option<Vec<u8>> = conn.hget(partition.as_str(), key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, partition: Partition, value: &[u8]) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: () = conn.hset(partition.as_str(), key, value).await?;
        Ok(())
    }

    async fn delete(&self, key: &str, partition: Partition) -> Result<bool> {
        let mut conn = self.connection.clone();
        // HDEL returns how many fields this call removed; zero means a
        // competing process already claimed the key.
        let removed: u32 = conn.hdel(partition.as_str(), key).await?;
        Ok(removed > 0)
    }

    async fn has(&self, key: &str, partition: Partition) -> Result<bool> {
        let mut conn = self.connection.clone();
        Ok(conn.hexists(partition.as_str(), key).await?)
    }

    async fn keys(&self, partition: Partition) -> Result<Vec<String>> {
        let mut conn = self.connection.clone();
        Ok(conn.hkeys(partition.as_str()).await?)
    }
}
