//! Delivery Engine (C5): resolve subscribers for a channel, serialize the
//! payload once, and best-effort send to whichever of them happen to be
//! locally owned. Remote subscribers are served by their own instance's
//! delivery call, triggered through C4.

use std::sync::Arc;

use gateway_protocol::ServerMessage;
use tracing::warn;

use crate::state::GatewayState;

/// Delivers `message` to every socket currently subscribed to `channel`
/// that happens to be owned by this instance. Conn ids owned elsewhere are
/// silently skipped: `GatewayState::send_to` already treats "not found
/// locally" the same as "send failed".
pub async fn deliver(state: &Arc<GatewayState>, channel: &str, message: &ServerMessage) {
    let subscribers = state.subscriptions.subscribers(channel).await;
    if subscribers.is_empty() {
        return;
    }
    let Some(serialized) = to_wire(message) else {
        return;
    };
    for conn_id in &subscribers {
        // Failure (unknown locally, or the write-loop task is gone) is a
        // no-op by design: the socket's own error path tears it down.
        let _ = state.send_to(conn_id, &serialized).await;
    }
}

/// Sends `message` to a single connection, ignoring whether it is actually
/// owned locally (the hub handlers that call this always act on the
/// connection the inbound frame arrived on, which is always local).
pub async fn send_one(state: &Arc<GatewayState>, conn_id: &str, message: &ServerMessage) {
    if let Some(serialized) = to_wire(message) {
        let _ = state.send_to(conn_id, &serialized).await;
    }
}

fn to_wire(message: &ServerMessage) -> Option<String> {
    match serde_json::to_string(message) {
        Ok(s) => Some(s),
        Err(e) => {
            warn!(error = %e, "failed to serialize server message");
            None
        }
    }
}

/// Same fan-out as `deliver`, but for payloads that arrived already
/// serialized: the pub/sub ingress path, where another instance did the
/// serializing at the point of origin and this instance only needs to
/// re-fan it out to its own local subscribers.
pub async fn deliver_raw(state: &Arc<GatewayState>, channel: &str, serialized: &str) {
    let subscribers = state.subscriptions.subscribers(channel).await;
    for conn_id in &subscribers {
        let _ = state.send_to(conn_id, serialized).await;
    }
}
