use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::StoreError;

use super::SharedStore;

/// Production `SharedStore` backed by Redis. Uses `ConnectionManager` so a
/// dropped connection is transparently reconnected rather than poisoning
/// every subsequent call.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    redis_url: String,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client =
            redis::Client::open(redis_url).map_err(|e| StoreError::Backend(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self {
            conn,
            redis_url: redis_url.to_string(),
        })
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.sadd::<_, _, ()>(key, member)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.srem::<_, _, ()>(key, member)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        conn.smembers(key)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        conn.get(key)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.hset::<_, _, _, ()>(key, field, value)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.hdel::<_, _, ()>(key, field)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, StoreError> {
        let mut conn = self.conn.clone();
        let map: std::collections::HashMap<String, String> = conn
            .hgetall(key)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(map.into_iter().collect())
    }

    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        let count: i64 = conn
            .incr(key, 1)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        if count == 1 {
            let _: () = conn
                .pexpire(key, ttl.as_millis() as i64)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        Ok(count)
    }

    async fn list_push_bounded(
        &self,
        key: &str,
        value: &str,
        max_len: usize,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(key, value)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        conn.ltrim::<_, ()>(key, 0, max_len as isize - 1)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn list_range(&self, key: &str, count: usize) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        conn.lrange(key, 0, count as isize - 1)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}

impl RedisStore {
    /// A second client handle for the pub/sub bus (C4), which needs its own
    /// dedicated connection rather than the shared `ConnectionManager` used
    /// for ordinary commands.
    pub fn client(&self) -> Result<redis::Client, StoreError> {
        redis::Client::open(self.redis_url.as_str()).map_err(|e| StoreError::Backend(e.to_string()))
    }
}
