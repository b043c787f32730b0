//! Subscription Index (C3): the shared forward (`channel -> conn ids`) and
//! reverse (`conn id -> channels`) maps. Writes are best-effort; callers
//! never propagate a store error, they log and move on. Convergence is
//! guaranteed by `unsubscribe_all` at disconnect, not by transactional
//! writes here.

use std::sync::Arc;

use tracing::warn;

use crate::store::{subscription_forward_key, subscription_reverse_key, SharedStore};

#[derive(Clone)]
pub struct SubscriptionIndex {
    store: Arc<dyn SharedStore>,
}

impl SubscriptionIndex {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    pub async fn subscribe(&self, conn_id: &str, channel: &str) {
        if let Err(e) = self
            .store
            .sadd(&subscription_forward_key(channel), conn_id)
            .await
        {
            warn!(conn_id, channel, error = %e, "subscribe: forward write failed");
        }
        if let Err(e) = self
            .store
            .sadd(&subscription_reverse_key(conn_id), channel)
            .await
        {
            warn!(conn_id, channel, error = %e, "subscribe: reverse write failed");
        }
    }

    pub async fn unsubscribe(&self, conn_id: &str, channel: &str) {
        if let Err(e) = self
            .store
            .srem(&subscription_forward_key(channel), conn_id)
            .await
        {
            warn!(conn_id, channel, error = %e, "unsubscribe: forward write failed");
        }
        if let Err(e) = self
            .store
            .srem(&subscription_reverse_key(conn_id), channel)
            .await
        {
            warn!(conn_id, channel, error = %e, "unsubscribe: reverse write failed");
        }
    }

    /// Reads the reverse set, removes `conn_id` from each channel's forward
    /// set, then deletes the reverse set. Idempotent: calling this twice in
    /// a row is a no-op the second time because the reverse set is already
    /// empty.
    pub async fn unsubscribe_all(&self, conn_id: &str) {
        let channels = match self.store.smembers(&subscription_reverse_key(conn_id)).await {
            Ok(channels) => channels,
            Err(e) => {
                warn!(conn_id, error = %e, "unsubscribe_all: reverse read failed");
                Vec::new()
            }
        };
        for channel in &channels {
            if let Err(e) = self
                .store
                .srem(&subscription_forward_key(channel), conn_id)
                .await
            {
                warn!(conn_id, channel, error = %e, "unsubscribe_all: forward write failed");
            }
        }
        if let Err(e) = self.store.delete(&subscription_reverse_key(conn_id)).await {
            warn!(conn_id, error = %e, "unsubscribe_all: reverse delete failed");
        }
    }

    /// All channels `conn_id` currently appears in, per the reverse index.
    pub async fn channels_for(&self, conn_id: &str) -> Vec<String> {
        match self.store.smembers(&subscription_reverse_key(conn_id)).await {
            Ok(channels) => channels,
            Err(e) => {
                warn!(conn_id, error = %e, "channels_for: reverse read failed");
                Vec::new()
            }
        }
    }

    pub async fn subscribers(&self, channel: &str) -> Vec<String> {
        match self.store.smembers(&subscription_forward_key(channel)).await {
            Ok(members) => members,
            Err(e) => {
                warn!(channel, error = %e, "subscribers: read failed");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn index() -> SubscriptionIndex {
        SubscriptionIndex::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn subscribe_then_unsubscribe_leaves_no_trace() {
        let idx = index();
        idx.subscribe("c1", "table:T1").await;
        assert_eq!(idx.subscribers("table:T1").await, vec!["c1".to_string()]);
        idx.unsubscribe("c1", "table:T1").await;
        assert!(idx.subscribers("table:T1").await.is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_all_clears_every_channel() {
        let idx = index();
        idx.subscribe("c1", "table:T1").await;
        idx.subscribe("c1", "chat:T1").await;
        idx.subscribe("c1", "lobby").await;
        idx.unsubscribe_all("c1").await;
        assert!(idx.subscribers("table:T1").await.is_empty());
        assert!(idx.subscribers("chat:T1").await.is_empty());
        assert!(idx.subscribers("lobby").await.is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_all_twice_is_idempotent() {
        let idx = index();
        idx.subscribe("c1", "table:T1").await;
        idx.unsubscribe_all("c1").await;
        idx.unsubscribe_all("c1").await;
        assert!(idx.subscribers("table:T1").await.is_empty());
    }

    #[tokio::test]
    async fn two_connections_on_same_channel_are_independent() {
        let idx = index();
        idx.subscribe("c1", "table:T1").await;
        idx.subscribe("c2", "table:T1").await;
        idx.unsubscribe("c1", "table:T1").await;
        assert_eq!(idx.subscribers("table:T1").await, vec!["c2".to_string()]);
    }
}
