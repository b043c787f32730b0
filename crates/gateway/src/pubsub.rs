//! Pub/Sub Bus (C4): the cross-instance event transport. All publishers
//! share one topic; channel kind lives inside the payload so a single
//! subscription covers `table`, `chat`, `timer`, and `lobby` messages alike.
//! Loop suppression compares the message's stamped source instance id
//! against this instance's own id.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::{Stream, StreamExt};
use gateway_protocol::{PubSubKind, PubSubMessage};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::StoreError;
use crate::store::PUBSUB_TOPIC;

pub type BoxStream = Pin<Box<dyn Stream<Item = String> + Send>>;
pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
pub type Handler = Arc<dyn Fn(PubSubMessage) -> HandlerFuture + Send + Sync>;

/// The raw transport a `PubSubBus` rides on: publish a string payload on a
/// topic, and get back a stream of every payload published to that topic
/// (including this process's own, which the bus filters out by source id).
#[async_trait::async_trait]
pub trait PubSubTransport: Send + Sync {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), StoreError>;
    async fn subscribe(&self, topic: &str) -> Result<BoxStream, StoreError>;
}

pub struct PubSubBus {
    transport: Arc<dyn PubSubTransport>,
    instance_id: String,
    task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl PubSubBus {
    pub fn new(transport: Arc<dyn PubSubTransport>, instance_id: String) -> Self {
        Self {
            transport,
            instance_id,
            task: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Stamps the message with this instance's id and writes it to the
    /// single shared topic.
    pub async fn publish(
        &self,
        kind: PubSubKind,
        table_id: &str,
        payload: serde_json::Value,
    ) -> Result<(), StoreError> {
        let message = PubSubMessage::new(kind, table_id, payload, self.instance_id.clone());
        let serialized = serde_json::to_string(&message)
            .map_err(|e| StoreError::Backend(format!("serialize pubsub message: {e}")))?;
        self.transport.publish(PUBSUB_TOPIC, &serialized).await
    }

    /// Subscribes once to the topic and dispatches each received message to
    /// the handler registered for its channel kind, unless the message's
    /// source id is this instance's own (loop suppression).
    pub async fn init(&self, handlers: HashMap<PubSubKind, Handler>) -> Result<(), StoreError> {
        let mut stream = self.transport.subscribe(PUBSUB_TOPIC).await?;
        let instance_id = self.instance_id.clone();
        let task = tokio::spawn(async move {
            while let Some(raw) = stream.next().await {
                let message: PubSubMessage = match serde_json::from_str(&raw) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(error = %e, "pubsub: failed to decode message, dropping");
                        continue;
                    }
                };
                if message.source_instance_id == instance_id {
                    debug!(kind = ?message.kind, "pubsub: suppressing own echo");
                    continue;
                }
                if let Some(handler) = handlers.get(&message.kind) {
                    handler(message).await;
                } else {
                    warn!(kind = ?message.kind, "pubsub: no handler registered for kind");
                }
            }
        });
        *self.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
        Ok(())
    }

    /// Idempotent: a second call is a no-op.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
    }
}

impl Drop for PubSubBus {
    fn drop(&mut self) {
        self.close();
    }
}

/// Redis-backed transport. Uses a dedicated `Client` (not the
/// `ConnectionManager` used for ordinary commands) because a subscribed
/// connection cannot issue regular commands.
pub struct RedisPubSubTransport {
    client: redis::Client,
}

impl RedisPubSubTransport {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl PubSubTransport for RedisPubSubTransport {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), StoreError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        redis::AsyncCommands::publish::<_, _, ()>(&mut conn, topic, payload)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn subscribe(&self, topic: &str) -> Result<BoxStream, StoreError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        pubsub
            .subscribe(topic)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let stream = pubsub
            .into_on_message()
            .filter_map(|msg| async move { msg.get_payload::<String>().ok() });
        Ok(Box::pin(stream))
    }
}

impl std::fmt::Debug for RedisPubSubTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisPubSubTransport").finish()
    }
}

/// In-process transport used by tests: every subscriber sees every publish
/// via a `tokio::sync::broadcast` channel, simulating a one-topic Redis bus
/// shared by however many "instances" a test wires up.
pub struct MemoryPubSubTransport {
    sender: tokio::sync::broadcast::Sender<String>,
}

impl MemoryPubSubTransport {
    pub fn new() -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(1024);
        Self { sender }
    }
}

impl Default for MemoryPubSubTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PubSubTransport for MemoryPubSubTransport {
    async fn publish(&self, _topic: &str, payload: &str) -> Result<(), StoreError> {
        // A send error just means nobody is currently subscribed; that is
        // not a failure for a fire-and-forget bus.
        let _ = self.sender.send(payload.to_string());
        Ok(())
    }

    async fn subscribe(&self, _topic: &str) -> Result<BoxStream, StoreError> {
        let rx = self.sender.subscribe();
        let stream = tokio_stream::wrappers::BroadcastStream::new(rx)
            .filter_map(|item| async move { item.ok() });
        Ok(Box::pin(stream))
    }
}
