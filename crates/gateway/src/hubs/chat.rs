//! Chat Hub (C9): per-table moderated chat. `ChatSend` runs the full
//! validate → rate-limit → membership → mute → persist → broadcast chain,
//! short-circuiting at the first failure.

use std::sync::Arc;

use chrono::Utc;
use gateway_protocol::{chat_channel, reasons, ChatRecord, PubSubKind, PubSubMessage, ServerMessage, CHAT_MAX_CHARS};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use super::HubContext;
use crate::broadcast;
use crate::rate_limit::Decision;
use crate::state::GatewayState;
use crate::store::chat_history_key;

const CHAT_HISTORY_MAX_LEN: usize = 50;

pub async fn subscribe(ctx: &HubContext, table_id: &str) {
    ctx.state
        .subscriptions
        .subscribe(&ctx.conn_id, &chat_channel(table_id))
        .await;

    let history = match ctx
        .state
        .store
        .list_range(&chat_history_key(table_id), CHAT_HISTORY_MAX_LEN)
        .await
    {
        Ok(raw) => raw
            .into_iter()
            .rev()
            .filter_map(|entry| serde_json::from_str::<ChatRecord>(&entry).ok())
            .collect(),
        Err(e) => {
            warn!(table_id, error = %e, "chat hub: history fetch failed");
            Vec::new()
        }
    };

    broadcast::send_one(
        &ctx.state,
        &ctx.conn_id,
        &ServerMessage::ChatSubscribed {
            table_id: table_id.to_string(),
            history,
        },
    )
    .await;
}

pub async fn unsubscribe(ctx: &HubContext, table_id: &str) {
    ctx.state
        .subscriptions
        .unsubscribe(&ctx.conn_id, &chat_channel(table_id))
        .await;
}

pub async fn send(ctx: &HubContext, table_id: &str, raw_message: &str) {
    let trimmed = raw_message.trim();
    if trimmed.is_empty() {
        send_chat_error(ctx, table_id, reasons::EMPTY_MESSAGE).await;
        return;
    }
    if trimmed.chars().count() > CHAT_MAX_CHARS {
        send_chat_error(ctx, table_id, reasons::MESSAGE_TOO_LONG).await;
        return;
    }

    if ctx.rate_limiter.check(&ctx.user_id, &ctx.remote_ip, "chat").await == Decision::Denied {
        send_chat_error(ctx, table_id, reasons::RATE_LIMITED).await;
        return;
    }

    let member = match ctx.services.game.get_table_state(table_id, &ctx.user_id).await {
        Ok(state) => is_member(&state.state_json, &ctx.user_id),
        Err(e) => {
            warn!(table_id, error = %e, "chat hub: get_table_state failed during membership check");
            false
        }
    };
    if !member {
        send_chat_error(ctx, table_id, reasons::NOT_SEATED).await;
        return;
    }

    match ctx.services.game.is_muted(table_id, &ctx.user_id).await {
        Ok(true) => {
            send_chat_error(ctx, table_id, reasons::MUTED).await;
            return;
        }
        Ok(false) => {}
        Err(e) => {
            warn!(table_id, error = %e, "chat hub: is_muted check failed, allowing message");
        }
    }

    let username = ctx
        .services
        .player
        .get_profile(&ctx.user_id)
        .await
        .ok()
        .flatten()
        .unwrap_or_else(|| "Unknown".to_string());

    let record = ChatRecord {
        id: Uuid::new_v4().to_string(),
        user_id: ctx.user_id.clone(),
        username,
        text: trimmed.to_string(),
        ts: Utc::now().to_rfc3339(),
    };

    if let Ok(serialized) = serde_json::to_string(&record) {
        if let Err(e) = ctx
            .state
            .store
            .list_push_bounded(&chat_history_key(table_id), &serialized, CHAT_HISTORY_MAX_LEN)
            .await
        {
            warn!(table_id, error = %e, "chat hub: failed to persist chat record");
        }
    }

    let channel = chat_channel(table_id);
    let message = ServerMessage::ChatMessage {
        table_id: table_id.to_string(),
        message: record,
    };
    broadcast::deliver(&ctx.state, &channel, &message).await;

    if let Ok(payload) = serde_json::to_value(&message) {
        if let Err(e) = ctx.bus.publish(PubSubKind::Chat, table_id, payload).await {
            warn!(table_id, error = %e, "chat hub: failed to publish to cross-instance bus");
        }
    }
}

async fn send_chat_error(ctx: &HubContext, table_id: &str, reason: &str) {
    broadcast::send_one(
        &ctx.state,
        &ctx.conn_id,
        &ServerMessage::ChatError {
            table_id: table_id.to_string(),
            reason: reason.to_string(),
        },
    )
    .await;
}

/// A user counts as a chat member if they appear seated with a non-empty
/// status or listed among the spectators.
fn is_member(state_json: &str, user_id: &str) -> bool {
    let Ok(state) = serde_json::from_str::<Value>(state_json) else {
        return false;
    };
    let seated = state["seats"]
        .as_array()
        .into_iter()
        .flatten()
        .any(|seat| {
            seat["userId"].as_str() == Some(user_id)
                && seat["status"].as_str().is_some_and(|s| !s.is_empty())
        });
    let spectating = state["spectators"]
        .as_array()
        .into_iter()
        .flatten()
        .any(|spectator| spectator.as_str() == Some(user_id));
    seated || spectating
}

pub async fn handle_ingress(state: &Arc<GatewayState>, message: PubSubMessage) {
    broadcast::deliver_raw(state, &chat_channel(&message.table_id), &message.payload.to_string()).await;
}
