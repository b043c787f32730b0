//! Hub Router (C7): owns the per-socket message loop after authentication.
//! Parses each inbound frame, looks up the handler by the `type` tag, and
//! dispatches into the table/chat/lobby hubs. Unparseable frames are
//! dropped silently; handler failures are logged and never close the
//! socket (that's the session lifecycle's job).

use gateway_protocol::ClientMessage;
use tracing::trace;

use crate::hubs::{chat, lobby, table, HubContext};

/// Decodes one raw text frame and dispatches it. Returns without effect on
/// malformed JSON or an unrecognized `type` tag.
pub async fn route(ctx: &HubContext, raw: &str) {
    let message: ClientMessage = match serde_json::from_str(raw) {
        Ok(m) => m,
        Err(e) => {
            trace!(error = %e, "router: dropping frame that doesn't match any known message shape");
            return;
        }
    };

    let table_id = message.table_id().map(str::to_string);
    let _span = tracing::info_span!("frame", conn_id = %ctx.conn_id, table_id = table_id.as_deref()).entered();

    dispatch(ctx, message).await;
}

async fn dispatch(ctx: &HubContext, message: ClientMessage) {
    match message {
        ClientMessage::Authenticate { .. } => {
            // Only meaningful during the auth handshake; the session
            // lifecycle consumes it before the router ever sees a frame.
        }
        ClientMessage::SubscribeTable { table_id } | ClientMessage::ResyncTable { table_id } => {
            table::subscribe(ctx, &table_id).await;
        }
        ClientMessage::UnsubscribeTable { table_id } => {
            table::unsubscribe(ctx, &table_id).await;
        }
        ClientMessage::JoinSeat {
            table_id,
            seat_id,
            buy_in_amount,
        } => {
            table::join_seat(ctx, &table_id, &seat_id, buy_in_amount.as_ref()).await;
        }
        ClientMessage::LeaveTable { table_id } => {
            table::leave_table(ctx, &table_id).await;
        }
        ClientMessage::Action {
            table_id,
            action,
            amount,
        } => {
            table::action(ctx, &table_id, &action, amount.as_ref()).await;
        }
        ClientMessage::SubscribeChat { table_id } => {
            chat::subscribe(ctx, &table_id).await;
        }
        ClientMessage::UnsubscribeChat { table_id } => {
            chat::unsubscribe(ctx, &table_id).await;
        }
        ClientMessage::ChatSend { table_id, message } => {
            chat::send(ctx, &table_id, &message).await;
        }
    }
}

/// Called once on socket close: detaches this connection from every hub's
/// bookkeeping. Table/chat channel membership is a set the subscription
/// index already tracks per connection, so a single sweep covers both hubs
/// plus lobby; only the table hub additionally needs a best-effort
/// `LeaveSpectator` per table it was subscribed to.
pub async fn unsubscribe_all(ctx: &HubContext) {
    let channels = ctx.state.subscriptions.channels_for(&ctx.conn_id).await;
    for channel in &channels {
        if let Some(table_id) = channel.strip_prefix("table:") {
            let _ = ctx.services.game.leave_spectator(table_id, &ctx.user_id).await;
        }
    }
    ctx.state.subscriptions.unsubscribe_all(&ctx.conn_id).await;
    lobby::detach(ctx).await;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::pubsub::{MemoryPubSubTransport, PubSubBus};
    use crate::rate_limit::RateLimiter;
    use crate::services::test_support::{FakeEventService, FakeGameService, FakePlayerService};
    use crate::services::{EventService, PlayerService, Services};
    use crate::state::{ConnectedClient, GatewayState};
    use crate::store::MemoryStore;

    async fn context(game: Arc<FakeGameService>) -> (HubContext, mpsc::UnboundedReceiver<crate::state::WriteCmd>) {
        let state = GatewayState::new("instance-1".into(), Arc::new(MemoryStore::new()));
        let (tx, rx) = mpsc::unbounded_channel();
        state
            .register_client(ConnectedClient::new("c1".into(), "u1".into(), "1.1.1.1".into(), tx))
            .await;
        let services = Services {
            game,
            player: Arc::new(FakePlayerService::new()) as Arc<dyn PlayerService>,
            event: Arc::new(FakeEventService::new()) as Arc<dyn EventService>,
        };
        let bus = Arc::new(PubSubBus::new(Arc::new(MemoryPubSubTransport::new()), "instance-1".into()));
        let rate_limiter = Arc::new(RateLimiter::new(state.store.clone(), Duration::from_millis(10_000), 20));
        (
            HubContext {
                state,
                services,
                rate_limiter,
                bus,
                conn_id: "c1".into(),
                user_id: "u1".into(),
                remote_ip: "1.1.1.1".into(),
            },
            rx,
        )
    }

    #[tokio::test]
    async fn drops_malformed_frame_silently() {
        let (ctx, mut rx) = context(Arc::new(FakeGameService::new())).await;

        route(&ctx, "not json").await;
        route(&ctx, r#"{"type":"NotARealMessage"}"#).await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dispatches_subscribe_table_to_the_table_hub() {
        let (ctx, mut rx) = context(Arc::new(FakeGameService::new())).await;

        route(&ctx, r#"{"type":"SubscribeTable","tableId":"T1"}"#).await;

        let frame = rx.try_recv().unwrap().into_text();
        assert!(frame.contains("TableSnapshot"));
    }

    #[tokio::test]
    async fn dispatches_chat_send_to_the_chat_hub() {
        let game = Arc::new(FakeGameService::new());
        *game.table_state_json.lock().unwrap() = r#"{"spectators":["u1"]}"#.to_string();
        let (ctx, mut rx) = context(game).await;

        route(&ctx, r#"{"type":"ChatSend","tableId":"T1","message":"hi"}"#).await;

        let frame = rx.try_recv().unwrap().into_text();
        assert!(frame.contains("ChatMessage"));
    }

    #[tokio::test]
    async fn unsubscribe_all_clears_every_channel() {
        let (ctx, _rx) = context(Arc::new(FakeGameService::new())).await;
        ctx.state.subscriptions.subscribe(&ctx.conn_id, "table:T1").await;
        ctx.state.subscriptions.subscribe(&ctx.conn_id, "chat:T1").await;

        unsubscribe_all(&ctx).await;

        assert!(ctx.state.subscriptions.channels_for(&ctx.conn_id).await.is_empty());
    }
}
