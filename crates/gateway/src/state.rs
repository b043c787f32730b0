//! Connection Registry (C2), local half. The shared half (directory rows,
//! by-user sets, instance heartbeats) lives in the store and is accessed
//! through `GatewayState` so callers never juggle both halves by hand.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, RwLock};
use tracing::warn;

use crate::store::{by_user_key, connection_key, instance_conns_key, ConnectionInfo, SharedStore};
use crate::subscriptions::SubscriptionIndex;

/// What the write-loop task does with a queued item: forward a text frame
/// verbatim, or tear down the socket with a real WS close frame carrying
/// `code`/`reason`.
#[derive(Debug, Clone)]
pub enum WriteCmd {
    Text(String),
    Close(u16, String),
}

#[cfg(test)]
impl WriteCmd {
    /// Unwraps the text frame a test expects; panics on `Close`, since a
    /// test that got a close instead of the frame it wanted has a real bug.
    pub fn into_text(self) -> String {
        match self {
            WriteCmd::Text(text) => text,
            WriteCmd::Close(code, reason) => panic!("expected a text frame, got Close({code}, {reason})"),
        }
    }
}

/// A connection accepted by this instance. The socket handle itself is
/// represented indirectly by `sender`: the write-loop task owns the actual
/// `SplitSink`, and this channel is the only way other tasks reach it.
pub struct ConnectedClient {
    pub conn_id: String,
    pub user_id: String,
    pub remote_ip: String,
    pub connected_at: Instant,
    sender: mpsc::UnboundedSender<WriteCmd>,
}

impl ConnectedClient {
    pub fn new(
        conn_id: String,
        user_id: String,
        remote_ip: String,
        sender: mpsc::UnboundedSender<WriteCmd>,
    ) -> Self {
        Self {
            conn_id,
            user_id,
            remote_ip,
            connected_at: Instant::now(),
            sender,
        }
    }

    /// Best-effort send. Only succeeds while the write-loop task (and thus
    /// the underlying socket) is still alive; any failure is swallowed by
    /// the caller; the socket's own error path will close it.
    pub fn send(&self, frame: &str) -> bool {
        self.sender.send(WriteCmd::Text(frame.to_string())).is_ok()
    }
}

pub struct GatewayState {
    pub instance_id: String,
    pub store: Arc<dyn SharedStore>,
    pub subscriptions: SubscriptionIndex,
    clients: RwLock<HashMap<String, ConnectedClient>>,
}

impl GatewayState {
    pub fn new(instance_id: String, store: Arc<dyn SharedStore>) -> Arc<Self> {
        let subscriptions = SubscriptionIndex::new(store.clone());
        Arc::new(Self {
            instance_id,
            store,
            subscriptions,
            clients: RwLock::new(HashMap::new()),
        })
    }

    /// Registers a freshly authenticated connection, locally and in the
    /// shared directory. Presence becomes `online` implicitly: `by-user`
    /// gains an entry.
    pub async fn register_client(&self, client: ConnectedClient) {
        let conn_id = client.conn_id.clone();
        let user_id = client.user_id.clone();
        self.clients.write().await.insert(conn_id.clone(), client);

        let info = ConnectionInfo {
            conn_id: conn_id.clone(),
            user_id: user_id.clone(),
            instance_id: self.instance_id.clone(),
        };
        let serialized = match serde_json::to_string(&info) {
            Ok(s) => s,
            Err(e) => {
                warn!(conn_id, error = %e, "register_client: failed to serialize connection info");
                return;
            }
        };
        if let Err(e) = self.store.set(&connection_key(&conn_id), &serialized).await {
            warn!(conn_id, error = %e, "register_client: directory write failed");
        }
        if let Err(e) = self.store.sadd(&by_user_key(&user_id), &conn_id).await {
            warn!(conn_id, error = %e, "register_client: by-user write failed");
        }
        if let Err(e) = self
            .store
            .sadd(&instance_conns_key(&self.instance_id), &conn_id)
            .await
        {
            warn!(conn_id, error = %e, "register_client: instance-conns write failed");
        }
    }

    /// Unregisters a connection, locally and in the shared directory.
    /// Returns the removed client (so the caller can still read its
    /// `user_id`/`connected_at` for session-ended bookkeeping) and whether
    /// the user has any connection left anywhere in the cluster.
    pub async fn remove_client(&self, conn_id: &str) -> Option<(ConnectedClient, bool)> {
        let client = self.clients.write().await.remove(conn_id)?;

        if let Err(e) = self.store.delete(&connection_key(conn_id)).await {
            warn!(conn_id, error = %e, "remove_client: directory delete failed");
        }
        if let Err(e) = self.store.srem(&by_user_key(&client.user_id), conn_id).await {
            warn!(conn_id, error = %e, "remove_client: by-user delete failed");
        }
        if let Err(e) = self
            .store
            .srem(&instance_conns_key(&self.instance_id), conn_id)
            .await
        {
            warn!(conn_id, error = %e, "remove_client: instance-conns delete failed");
        }

        let has_other = !self.user_connection_ids(&client.user_id).await.is_empty();
        Some((client, has_other))
    }

    pub async fn user_connection_ids(&self, user_id: &str) -> Vec<String> {
        match self.store.smembers(&by_user_key(user_id)).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(user_id, error = %e, "user_connection_ids: read failed");
                Vec::new()
            }
        }
    }

    /// Best-effort send to a locally-owned connection. Conn ids owned by
    /// other instances are simply absent from this map and the send is a
    /// silent no-op; they are served by their own owning instance.
    pub async fn send_to(&self, conn_id: &str, text: &str) -> bool {
        match self.clients.read().await.get(conn_id) {
            Some(client) => client.send(text),
            None => false,
        }
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }
}
