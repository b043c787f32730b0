//! The `/ws` upgrade route. Resolves the pre-auth query-string token, then
//! hands the accepted socket off to the session lifecycle (C11).

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Query, State};
use axum::response::IntoResponse;

use crate::session::{self, SessionDeps};

pub async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<HashMap<String, String>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(deps): State<SessionDeps>,
) -> impl IntoResponse {
    let query_token = query.get("token").cloned();
    ws.on_upgrade(move |socket| session::run(socket, addr, query_token, deps))
}
