//! Lobby Hub (C10): the single global `lobby` channel listing open tables.

use std::sync::Arc;

use gateway_protocol::{PubSubMessage, ServerMessage, LOBBY_CHANNEL};
use serde_json::Value;
use tracing::warn;

use super::HubContext;
use crate::broadcast;
use crate::state::GatewayState;

pub async fn attach(ctx: &HubContext) {
    ctx.state.subscriptions.subscribe(&ctx.conn_id, LOBBY_CHANNEL).await;

    match ctx.services.game.list_tables().await {
        Ok(resp) => {
            let tables: Vec<Value> = serde_json::from_str(&resp.tables_json).unwrap_or_default();
            broadcast::send_one(
                &ctx.state,
                &ctx.conn_id,
                &ServerMessage::LobbyTablesUpdated { tables },
            )
            .await;
        }
        Err(e) => {
            warn!(error = %e, "lobby hub: list_tables failed");
        }
    }
}

pub async fn detach(ctx: &HubContext) {
    ctx.state.subscriptions.unsubscribe(&ctx.conn_id, LOBBY_CHANNEL).await;
}

pub async fn handle_ingress(state: &Arc<GatewayState>, message: PubSubMessage) {
    let tables: Vec<Value> = match serde_json::from_value(message.payload) {
        Ok(tables) => tables,
        Err(e) => {
            warn!(error = %e, "lobby hub: ingress payload wasn't a tables array");
            return;
        }
    };
    broadcast::deliver(state, LOBBY_CHANNEL, &ServerMessage::LobbyTablesUpdated { tables }).await;
}
