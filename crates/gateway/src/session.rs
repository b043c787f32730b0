//! Session Lifecycle (C11): the per-socket state machine from upgrade to
//! close (`Connecting -> AwaitingAuth -> Authenticated -> Closed`). The
//! accept handler in `ws.rs` hands off to `run` once the upgrade completes;
//! everything from the auth handshake through cleanup happens here.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::{SplitStream, StreamExt};
use futures::SinkExt;
use gateway_protocol::{close_codes, ClientMessage, ServerMessage};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::auth::{AuthClaims, TokenVerifier};
use crate::error::TokenError;
use crate::hubs::HubContext;
use crate::pubsub::PubSubBus;
use crate::rate_limit::RateLimiter;
use crate::router;
use crate::services::Services;
use crate::state::{ConnectedClient, GatewayState, WriteCmd};

/// Everything a freshly accepted socket needs to run its lifecycle, bundled
/// so `ws.rs`'s upgrade handler has one thing to clone per connection.
#[derive(Clone)]
pub struct SessionDeps {
    pub state: Arc<GatewayState>,
    pub verifier: Arc<TokenVerifier>,
    pub services: Services,
    pub rate_limiter: Arc<RateLimiter>,
    pub bus: Arc<PubSubBus>,
    pub auth_timeout: Duration,
    pub heartbeat_interval: Duration,
}

/// Drives one socket through its full lifecycle. `query_token` is whatever
/// the `token` query parameter carried on the upgrade request, if any:
/// the pre-auth query-token path. `None` means the client must send an
/// `Authenticate` frame within `deps.auth_timeout`.
pub async fn run(socket: WebSocket, remote_addr: SocketAddr, query_token: Option<String>, deps: SessionDeps) {
    let remote_ip = remote_addr.ip().to_string();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (client_tx, mut client_rx) = mpsc::unbounded_channel::<WriteCmd>();

    let heartbeat_interval = deps.heartbeat_interval;
    let write_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat_interval);
        ticker.tick().await; // first tick fires immediately; skip it
        loop {
            tokio::select! {
                cmd = client_rx.recv() => {
                    match cmd {
                        Some(WriteCmd::Text(text)) => {
                            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        Some(WriteCmd::Close(code, reason)) => {
                            let _ = ws_tx
                                .send(Message::Close(Some(CloseFrame {
                                    code,
                                    reason: reason.into(),
                                })))
                                .await;
                            break;
                        }
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let claims = match await_auth(&mut ws_rx, &deps.verifier, query_token, deps.auth_timeout).await {
        Ok(claims) => claims,
        Err((code, reason)) => {
            send_close(&client_tx, code, reason);
            drop(client_tx);
            let _ = write_handle.await;
            return;
        }
    };

    let conn_id = uuid::Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, user_id = %claims.user_id, "session: authenticated");

    deps.state
        .register_client(ConnectedClient::new(
            conn_id.clone(),
            claims.user_id.clone(),
            remote_ip.clone(),
            client_tx.clone(),
        ))
        .await;

    publish_lifecycle_event(&deps.services, "SESSION_STARTED", &conn_id, &claims.user_id, None).await;

    send_json(
        &client_tx,
        &ServerMessage::Welcome {
            user_id: claims.user_id.clone(),
            connection_id: conn_id.clone(),
        },
    );

    let ctx = HubContext {
        state: deps.state.clone(),
        services: deps.services.clone(),
        rate_limiter: deps.rate_limiter.clone(),
        bus: deps.bus.clone(),
        conn_id: conn_id.clone(),
        user_id: claims.user_id.clone(),
        remote_ip,
    };

    message_loop(&mut ws_rx, &ctx, deps.heartbeat_interval).await;

    router::unsubscribe_all(&ctx).await;
    if let Some((removed, _has_other)) = deps.state.remove_client(&conn_id).await {
        let elapsed = removed.connected_at.elapsed().as_secs();
        publish_lifecycle_event(&deps.services, "SESSION_ENDED", &conn_id, &claims.user_id, Some(elapsed)).await;
    }
    info!(conn_id = %conn_id, "session: closed");

    drop(client_tx);
    let _ = write_handle.await;
}

/// Outcome of one attempt to read an `Authenticate` frame off the socket,
/// distinct from "the auth timeout elapsed" (that's `await_auth`'s job, not
/// this function's, since only the caller knows about the timeout).
enum AuthAttempt {
    Ok(AuthClaims),
    Rejected(TokenError),
    /// Stream ended, carried a close frame, or didn't parse as an
    /// `Authenticate` frame at all.
    Malformed,
}

/// `AwaitingAuth`. A validated query token resolves immediately; an invalid
/// one closes immediately; a missing one waits up to `timeout` for an
/// `Authenticate` frame. The returned close code/reason pair is handed
/// straight to `send_close`.
async fn await_auth(
    ws_rx: &mut SplitStream<WebSocket>,
    verifier: &TokenVerifier,
    query_token: Option<String>,
    timeout: Duration,
) -> Result<AuthClaims, (u16, &'static str)> {
    if let Some(token) = query_token.filter(|t| !t.is_empty()) {
        return verifier.verify(&token).await.map_err(|e| {
            warn!(error = %e, "session: query-string auth token rejected");
            token_error_close(&e)
        });
    }

    match tokio::time::timeout(timeout, wait_for_authenticate_frame(ws_rx, verifier)).await {
        Ok(AuthAttempt::Ok(claims)) => Ok(claims),
        Ok(AuthAttempt::Rejected(e)) => Err(token_error_close(&e)),
        Ok(AuthAttempt::Malformed) => Err((close_codes::UNAUTHORIZED, "Invalid authentication payload")),
        Err(_) => Err((close_codes::UNAUTHORIZED, "Authentication required")),
    }
}

/// Picks 1008 "Unauthorized" for a permanent rejection, or 1011
/// "Authentication unavailable" for a transient one (the IdP being
/// unreachable is worth a different signal than a bad token).
fn token_error_close(e: &TokenError) -> (u16, &'static str) {
    if e.is_transient() {
        (close_codes::INTERNAL_ERROR, "Authentication unavailable")
    } else {
        (close_codes::UNAUTHORIZED, "Unauthorized")
    }
}

async fn wait_for_authenticate_frame(ws_rx: &mut SplitStream<WebSocket>, verifier: &TokenVerifier) -> AuthAttempt {
    while let Some(msg) = ws_rx.next().await {
        let text = match msg {
            Ok(Message::Text(t)) => t.to_string(),
            Ok(Message::Close(_)) => return AuthAttempt::Malformed,
            Ok(_) => continue,
            Err(_) => return AuthAttempt::Malformed,
        };
        let Ok(ClientMessage::Authenticate { token }) = serde_json::from_str(&text) else {
            return AuthAttempt::Malformed;
        };
        return match verifier.verify(&token).await {
            Ok(claims) => AuthAttempt::Ok(claims),
            Err(e) => AuthAttempt::Rejected(e),
        };
    }
    AuthAttempt::Malformed
}

/// `Authenticated`. Dispatches every inbound frame to the router; a read
/// timeout longer than twice the heartbeat interval without any frame
/// (including a pong) closes the socket locally.
async fn message_loop(ws_rx: &mut SplitStream<WebSocket>, ctx: &HubContext, heartbeat_interval: Duration) {
    let pong_timeout = heartbeat_interval * 2;
    loop {
        match tokio::time::timeout(pong_timeout, ws_rx.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => router::route(ctx, &text).await,
            Ok(Some(Ok(Message::Pong(_)))) => {}
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => break,
            Ok(Some(Ok(_))) => {}
            Ok(Some(Err(e))) => {
                warn!(conn_id = %ctx.conn_id, error = %e, "session: read error");
                break;
            }
            Err(_) => {
                warn!(conn_id = %ctx.conn_id, "session: heartbeat timeout, missed pong");
                break;
            }
        }
    }
}

fn send_json(client_tx: &mpsc::UnboundedSender<WriteCmd>, message: &ServerMessage) {
    if let Ok(frame) = serde_json::to_string(message) {
        let _ = client_tx.send(WriteCmd::Text(frame));
    }
}

/// Queues a real WS close frame on the write-loop task, which is the only
/// task that still owns the socket's sink half.
fn send_close(client_tx: &mpsc::UnboundedSender<WriteCmd>, code: u16, reason: &str) {
    let _ = client_tx.send(WriteCmd::Close(code, reason.to_string()));
}

async fn publish_lifecycle_event(
    services: &Services,
    event_type: &str,
    conn_id: &str,
    user_id: &str,
    elapsed_secs: Option<u64>,
) {
    let mut payload = json!({
        "connectionId": conn_id,
        "userId": user_id,
        "ts": chrono::Utc::now().to_rfc3339(),
    });
    if let Some(secs) = elapsed_secs {
        payload["elapsedSecs"] = json!(secs);
    }
    if let Err(e) = services.event.publish_event(event_type, payload).await {
        warn!(conn_id, event_type, error = %e, "session: failed to publish lifecycle event");
    }
}
