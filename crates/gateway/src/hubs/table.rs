//! Table Hub (C8): subscribe/resync, seat operations, action submission,
//! and pub/sub ingress for the `table`/`timer` channel kinds.

use gateway_protocol::{reasons, table_channel, PubSubMessage, ServerMessage, TableAction, SEAT_ID_MAX, SEAT_ID_MIN};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

use super::HubContext;
use crate::broadcast;
use crate::rate_limit::Decision;
use crate::state::GatewayState;

/// Shared by `SubscribeTable` and `ResyncTable`: both attach the socket to
/// the channel and push a fresh snapshot.
pub async fn subscribe(ctx: &HubContext, table_id: &str) {
    ctx.state
        .subscriptions
        .subscribe(&ctx.conn_id, &table_channel(table_id))
        .await;

    // Advisory only; failures never block the snapshot fetch.
    let _ = ctx.services.game.join_spectator(table_id, &ctx.user_id).await;

    let (table_result, state_result) = tokio::join!(
        ctx.services.game.get_table(table_id),
        ctx.services.game.get_table_state(table_id, &ctx.user_id),
    );

    let table = match table_result {
        Ok(t) => t,
        Err(e) => {
            warn!(table_id, error = %e, "table hub: get_table failed, client will re-sync");
            return;
        }
    };
    let state = match state_result {
        Ok(s) => s,
        Err(e) => {
            warn!(table_id, error = %e, "table hub: get_table_state failed, client will re-sync");
            return;
        }
    };

    let table_state = merge_snapshot(&table.state_json, &state.state_json);
    broadcast::send_one(
        &ctx.state,
        &ctx.conn_id,
        &ServerMessage::TableSnapshot { table_state },
    )
    .await;

    if state.has_hole_cards {
        let cards: Vec<Value> = serde_json::from_str(&state.hole_cards_json).unwrap_or_default();
        let hand_id = (!state.hand_id.is_empty()).then(|| state.hand_id.clone());
        broadcast::send_one(
            &ctx.state,
            &ctx.conn_id,
            &ServerMessage::HoleCards {
                table_id: table_id.to_string(),
                hand_id,
                cards,
            },
        )
        .await;
    }
}

pub async fn unsubscribe(ctx: &HubContext, table_id: &str) {
    let _ = ctx.services.game.leave_spectator(table_id, &ctx.user_id).await;
    ctx.state
        .subscriptions
        .unsubscribe(&ctx.conn_id, &table_channel(table_id))
        .await;
}

pub async fn join_seat(ctx: &HubContext, table_id: &str, seat_id_raw: &Value, buy_in_raw: Option<&Value>) {
    let Some(seat_id) = coerce_seat_id(seat_id_raw) else {
        broadcast::send_one(
            &ctx.state,
            &ctx.conn_id,
            &ServerMessage::Error {
                message: "invalid seat id".to_string(),
                code: Some("invalid_seat".to_string()),
            },
        )
        .await;
        return;
    };
    let buy_in = coerce_buy_in(buy_in_raw);

    match ctx
        .services
        .game
        .join_seat(table_id, &ctx.user_id, seat_id, buy_in)
        .await
    {
        Ok(resp) if resp.ok => {}
        Ok(resp) => {
            broadcast::send_one(
                &ctx.state,
                &ctx.conn_id,
                &ServerMessage::Error {
                    message: resp.error,
                    code: None,
                },
            )
            .await;
        }
        Err(e) => {
            warn!(table_id, error = %e, "table hub: join_seat RPC failed");
            broadcast::send_one(
                &ctx.state,
                &ctx.conn_id,
                &ServerMessage::Error {
                    message: "internal error".to_string(),
                    code: Some(reasons::INTERNAL_ERROR.to_string()),
                },
            )
            .await;
        }
    }
}

pub async fn leave_table(ctx: &HubContext, table_id: &str) {
    let _ = ctx.services.game.leave_seat(table_id, &ctx.user_id).await;
}

pub async fn action(ctx: &HubContext, table_id: &str, action_label: &str, amount_raw: Option<&Value>) {
    if table_id.trim().is_empty() {
        send_action_result(ctx, table_id, false, Some(reasons::INVALID_ACTION)).await;
        return;
    }

    let Some(action) = TableAction::from_client_label(action_label) else {
        send_action_result(ctx, table_id, false, Some(reasons::INVALID_ACTION)).await;
        return;
    };

    let amount = amount_raw.and_then(coerce_finite);
    if action.requires_amount() && amount.is_none() {
        send_action_result(ctx, table_id, false, Some(reasons::MISSING_AMOUNT)).await;
        return;
    }

    if ctx.rate_limiter.check(&ctx.user_id, &ctx.remote_ip, "action").await == Decision::Denied {
        send_action_result(ctx, table_id, false, Some(reasons::RATE_LIMITED)).await;
        return;
    }

    let label = action_wire_label(action);
    match ctx
        .services
        .game
        .submit_action(table_id, &ctx.user_id, label, amount)
        .await
    {
        Ok(resp) => {
            send_action_result(ctx, table_id, resp.ok, (!resp.error.is_empty()).then_some(resp.error.as_str())).await;
        }
        Err(e) => {
            warn!(table_id, error = %e, "table hub: submit_action RPC failed");
            send_action_result(ctx, table_id, false, Some(reasons::INTERNAL_ERROR)).await;
        }
    }
}

async fn send_action_result(ctx: &HubContext, table_id: &str, accepted: bool, reason: Option<&str>) {
    broadcast::send_one(
        &ctx.state,
        &ctx.conn_id,
        &ServerMessage::ActionResult {
            table_id: table_id.to_string(),
            accepted,
            reason: reason.map(str::to_string),
        },
    )
    .await;
}

fn action_wire_label(action: TableAction) -> &'static str {
    match action {
        TableAction::Fold => "FOLD",
        TableAction::Check => "CHECK",
        TableAction::Call => "CALL",
        TableAction::Bet => "BET",
        TableAction::Raise => "RAISE",
    }
}

fn coerce_seat_id(value: &Value) -> Option<i64> {
    let seat_id = value.as_i64()?;
    (SEAT_ID_MIN..=SEAT_ID_MAX).contains(&seat_id).then_some(seat_id)
}

fn coerce_buy_in(value: Option<&Value>) -> f64 {
    let candidate = value.and_then(coerce_finite);
    match candidate {
        Some(n) if n > 0.0 => n,
        _ => gateway_protocol::DEFAULT_BUY_IN,
    }
}

fn coerce_finite(value: &Value) -> Option<f64> {
    value.as_f64().filter(|n| n.is_finite())
}

fn merge_snapshot(table_json: &str, state_json: &str) -> Value {
    let table: Value = serde_json::from_str(table_json).unwrap_or(Value::Null);
    let state: Value = serde_json::from_str(state_json).unwrap_or(Value::Null);
    match (table, state) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (k, v) in overlay {
                base.insert(k, v);
            }
            Value::Object(base)
        }
        (Value::Object(base), _) => Value::Object(base),
        (_, overlay @ Value::Object(_)) => overlay,
        _ => Value::Null,
    }
}

pub async fn handle_ingress(state: &Arc<GatewayState>, message: PubSubMessage) {
    broadcast::deliver_raw(state, &table_channel(&message.table_id), &message.payload.to_string()).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hubs::HubContext;
    use crate::pubsub::{MemoryPubSubTransport, PubSubBus};
    use crate::rate_limit::RateLimiter;
    use crate::services::test_support::{FakeEventService, FakeGameService, FakePlayerService};
    use crate::services::{EventService, GameService, PlayerService, Services};
    use crate::store::MemoryStore;
    use std::time::Duration;
    use tokio::sync::mpsc;

    async fn context(game: Arc<dyn GameService>) -> (HubContext, mpsc::UnboundedReceiver<crate::state::WriteCmd>) {
        let state = GatewayState::new("instance-1".into(), Arc::new(MemoryStore::new()));
        let (tx, rx) = mpsc::unbounded_channel();
        state
            .register_client(crate::state::ConnectedClient::new(
                "c1".into(),
                "u1".into(),
                "1.1.1.1".into(),
                tx,
            ))
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
    async fn subscribe_sends_snapshot() {
        let game = Arc::new(FakeGameService::new());
        *game.table_state_json.lock().unwrap() = r#"{"pot":10}"#.to_string();
        let (ctx, mut rx) = context(game).await;

        subscribe(&ctx, "T1").await;

        let frame = rx.try_recv().unwrap().into_text();
        assert!(frame.contains("TableSnapshot"));
        assert!(frame.contains("\"pot\":10"));
    }

    #[tokio::test]
    async fn subscribe_sends_hole_cards_when_present() {
        let game = Arc::new(FakeGameService::new());
        *game.hole_cards_json.lock().unwrap() = Some("[1,2]".to_string());
        *game.hand_id.lock().unwrap() = "hand-1".to_string();
        let (ctx, mut rx) = context(game).await;

        subscribe(&ctx, "T1").await;
        let _snapshot = rx.try_recv().unwrap();
        let hole_cards = rx.try_recv().unwrap().into_text();
        assert!(hole_cards.contains("HoleCards"));
        assert!(hole_cards.contains("hand-1"));
    }

    #[tokio::test]
    async fn action_rejects_unknown_label() {
        let game = Arc::new(FakeGameService::new());
        let (ctx, mut rx) = context(game.clone()).await;

        action(&ctx, "T1", "AllIn", None).await;

        let frame = rx.try_recv().unwrap().into_text();
        assert!(frame.contains("invalid_action"));
        assert!(game.submitted_actions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn action_requires_amount_for_bet() {
        let game = Arc::new(FakeGameService::new());
        let (ctx, mut rx) = context(game.clone()).await;

        action(&ctx, "T1", "Bet", None).await;

        let frame = rx.try_recv().unwrap().into_text();
        assert!(frame.contains("missing_amount"));
        assert!(game.submitted_actions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn action_enforces_rate_limit() {
        let game = Arc::new(FakeGameService::new());
        let (ctx, mut rx) = context(game.clone()).await;
        let limited_ctx = HubContext {
            rate_limiter: Arc::new(RateLimiter::new(ctx.state.store.clone(), Duration::from_millis(10_000), 0)),
            ..ctx
        };

        action(&limited_ctx, "T1", "Fold", None).await;

        let frame = rx.try_recv().unwrap().into_text();
        assert!(frame.contains("rate_limited"));
        assert!(game.submitted_actions.lock().unwrap().is_empty());
    }

    #[test]
    fn coerce_seat_id_rejects_out_of_range() {
        assert_eq!(coerce_seat_id(&Value::from(0)), Some(0));
        assert_eq!(coerce_seat_id(&Value::from(8)), Some(8));
        assert_eq!(coerce_seat_id(&Value::from(-1)), None);
        assert_eq!(coerce_seat_id(&Value::from(9)), None);
    }

    #[test]
    fn coerce_buy_in_defaults_when_non_positive() {
        assert_eq!(coerce_buy_in(None), gateway_protocol::DEFAULT_BUY_IN);
        assert_eq!(coerce_buy_in(Some(&Value::from(-5.0))), gateway_protocol::DEFAULT_BUY_IN);
        assert_eq!(coerce_buy_in(Some(&Value::from(50.0))), 50.0);
    }
}
