//! The three client-facing hubs (C8-C10) multiplexed over one socket, plus
//! the glue that wires pub/sub ingress (C4) to each hub's channel kind.

pub mod chat;
pub mod lobby;
pub mod table;

use std::collections::HashMap;
use std::sync::Arc;

use gateway_protocol::PubSubKind;

use crate::pubsub::{Handler, HandlerFuture, PubSubBus};
use crate::rate_limit::RateLimiter;
use crate::services::Services;
use crate::state::GatewayState;

/// Everything a hub handler needs: shared state, the downstream service
/// clients, the rate limiter, the cross-instance bus, and the identity of
/// the connection the inbound frame arrived on.
#[derive(Clone)]
pub struct HubContext {
    pub state: Arc<GatewayState>,
    pub services: Services,
    pub rate_limiter: Arc<RateLimiter>,
    pub bus: Arc<PubSubBus>,
    pub conn_id: String,
    pub user_id: String,
    pub remote_ip: String,
}

/// Builds the handler table passed to `PubSubBus::init`: each channel kind
/// forwards to the local subscribers of the channel its payload names.
pub fn pubsub_handlers(state: Arc<GatewayState>) -> HashMap<PubSubKind, Handler> {
    let mut handlers: HashMap<PubSubKind, Handler> = HashMap::new();

    let table_state = state.clone();
    handlers.insert(
        PubSubKind::Table,
        Arc::new(move |msg| {
            let state = table_state.clone();
            Box::pin(async move { table::handle_ingress(&state, msg).await }) as HandlerFuture
        }),
    );

    let timer_state = state.clone();
    handlers.insert(
        PubSubKind::Timer,
        Arc::new(move |msg| {
            let state = timer_state.clone();
            Box::pin(async move { table::handle_ingress(&state, msg).await }) as HandlerFuture
        }),
    );

    let chat_state = state.clone();
    handlers.insert(
        PubSubKind::Chat,
        Arc::new(move |msg| {
            let state = chat_state.clone();
            Box::pin(async move { chat::handle_ingress(&state, msg).await }) as HandlerFuture
        }),
    );

    handlers.insert(
        PubSubKind::Lobby,
        Arc::new(move |msg| {
            let state = state.clone();
            Box::pin(async move { lobby::handle_ingress(&state, msg).await }) as HandlerFuture
        }),
    );

    handlers
}
