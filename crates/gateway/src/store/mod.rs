//! The shared key-value store abstraction. Everything cross-instance (the
//! connection directory's shared half, the subscription index, rate-limit
//! counters, instance presence, and the chat history buffer) is built on
//! top of this one trait so the rest of the gateway never talks to Redis
//! directly.

mod memory_store;
mod redis_store;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use memory_store::MemoryStore;
pub use redis_store::RedisStore;

use crate::error::StoreError;

/// A directory row for one locally-accepted connection, as seen by every
/// other instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub conn_id: String,
    pub user_id: String,
    pub instance_id: String,
}

/// Generic set/string/hash/list operations over the shared store. Every
/// write is best-effort from the caller's point of view: implementations
/// surface errors, but C3/C2 callers log-and-continue rather than
/// propagate them.
#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError>;
    async fn srem(&self, key: &str, member: &str) -> Result<(), StoreError>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;
    async fn hdel(&self, key: &str, field: &str) -> Result<(), StoreError>;
    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, StoreError>;

    /// Atomically increments `key`, setting a TTL equal to `ttl` only on the
    /// increment that takes the counter from absent/0 to 1. Returns the
    /// post-increment count.
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64, StoreError>;

    /// Pushes `value` onto the head of the list at `key`, trimming it to
    /// `max_len` entries.
    async fn list_push_bounded(
        &self,
        key: &str,
        value: &str,
        max_len: usize,
    ) -> Result<(), StoreError>;

    /// Returns up to `count` entries, most-recently-pushed first.
    async fn list_range(&self, key: &str, count: usize) -> Result<Vec<String>, StoreError>;
}

pub fn connection_key(conn_id: &str) -> String {
    format!("gateway:conn:{conn_id}")
}

pub fn by_user_key(user_id: &str) -> String {
    format!("gateway:byuser:{user_id}")
}

pub fn instance_conns_key(instance_id: &str) -> String {
    format!("gateway:instance_conns:{instance_id}")
}

pub const INSTANCES_KEY: &str = "gateway:instances";

pub fn subscription_forward_key(channel: &str) -> String {
    format!("gateway:subscriptions:{channel}")
}

pub fn subscription_reverse_key(conn_id: &str) -> String {
    format!("conn_subs:{conn_id}")
}

pub fn rate_limit_user_key(user_id: &str, kind: &str) -> String {
    format!("ratelimit:ws:user:{user_id}:{kind}")
}

pub fn rate_limit_ip_key(ip: &str, kind: &str) -> String {
    format!("ratelimit:ws:ip:{ip}:{kind}")
}

pub fn chat_history_key(table_id: &str) -> String {
    format!("gateway:chat:history:{table_id}")
}

pub const PUBSUB_TOPIC: &str = "gateway:ws:events";
