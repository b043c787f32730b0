//! Downstream RPC clients (A5). The `game.*`, `player.*`, and `event.*`
//! interfaces are modeled as async traits so hub handlers depend on an
//! interface, not a transport; `GrpcGameService` and friends
//! implement them over a shared `tonic` channel using a single generic
//! unary-call helper, since no `.proto` file is part of this repository;
//! the wire contract belongs to the downstream services.

use std::sync::Arc;

use async_trait::async_trait;
use http::uri::PathAndQuery;
use prost::Message;
use tonic::client::Grpc;
use tonic::transport::Channel;
use tonic::Request;

use crate::error::RpcError;

/// Bundles the three downstream clients so hub handlers take one dependency
/// instead of three.
#[derive(Clone)]
pub struct Services {
    pub game: Arc<dyn GameService>,
    pub player: Arc<dyn PlayerService>,
    pub event: Arc<dyn EventService>,
}

impl Services {
    pub fn grpc(game_channel: Channel, player_channel: Channel, event_channel: Channel) -> Self {
        Self {
            game: Arc::new(GrpcGameService::new(game_channel)),
            player: Arc::new(GrpcPlayerService::new(player_channel)),
            event: Arc::new(GrpcEventService::new(event_channel)),
        }
    }
}

async fn call<Req, Resp>(channel: Channel, path: &'static str, req: Req) -> Result<Resp, RpcError>
where
    Req: Message + Default + 'static,
    Resp: Message + Default + 'static,
{
    let mut grpc = Grpc::new(channel);
    grpc.ready()
        .await
        .map_err(|e| RpcError::Unavailable(e.to_string()))?;
    let path = PathAndQuery::from_static(path);
    let response = grpc
        .unary(Request::new(req), path, tonic::codec::ProstCodec::default())
        .await
        .map_err(|e| RpcError::Failed(e.to_string()))?;
    Ok(response.into_inner())
}

#[derive(Clone, PartialEq, Message)]
struct Empty {}

#[derive(Clone, PartialEq, Message)]
struct SpectatorRequest {
    #[prost(string, tag = "1")]
    table_id: String,
    #[prost(string, tag = "2")]
    user_id: String,
}

#[derive(Clone, PartialEq, Message)]
struct TableRequest {
    #[prost(string, tag = "1")]
    table_id: String,
}

/// JSON-encoded table snapshot; the exact shape is owned by the game
/// service, so the gateway carries it opaquely and hands it to the client
/// verbatim as `TableSnapshot.tableState`.
#[derive(Clone, PartialEq, Message)]
pub struct GetTableResponse {
    #[prost(string, tag = "1")]
    pub state_json: String,
}

#[derive(Clone, PartialEq, Message)]
struct TableStateRequest {
    #[prost(string, tag = "1")]
    table_id: String,
    #[prost(string, tag = "2")]
    user_id: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct GetTableStateResponse {
    #[prost(string, tag = "1")]
    pub state_json: String,
    #[prost(bool, tag = "2")]
    pub has_hole_cards: bool,
    #[prost(string, tag = "3")]
    pub hole_cards_json: String,
    #[prost(string, tag = "4")]
    pub hand_id: String,
}

#[derive(Clone, PartialEq, Message)]
struct JoinSeatRequest {
    #[prost(string, tag = "1")]
    table_id: String,
    #[prost(string, tag = "2")]
    user_id: String,
    #[prost(int64, tag = "3")]
    seat_id: i64,
    #[prost(double, tag = "4")]
    buy_in_amount: f64,
}

#[derive(Clone, PartialEq, Message)]
struct LeaveSeatRequest {
    #[prost(string, tag = "1")]
    table_id: String,
    #[prost(string, tag = "2")]
    user_id: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct OkResponse {
    #[prost(bool, tag = "1")]
    pub ok: bool,
    #[prost(string, tag = "2")]
    pub error: String,
}

#[derive(Clone, PartialEq, Message)]
struct SubmitActionRequest {
    #[prost(string, tag = "1")]
    table_id: String,
    #[prost(string, tag = "2")]
    user_id: String,
    #[prost(string, tag = "3")]
    action: String,
    #[prost(bool, tag = "4")]
    has_amount: bool,
    #[prost(double, tag = "5")]
    amount: f64,
}

#[derive(Clone, PartialEq, Message)]
struct IsMutedResponse {
    #[prost(bool, tag = "1")]
    is_muted: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct ListTablesResponse {
    /// JSON-encoded array; the gateway never interprets individual fields.
    #[prost(string, tag = "1")]
    pub tables_json: String,
}

#[derive(Clone, PartialEq, Message)]
struct GetProfileRequest {
    #[prost(string, tag = "1")]
    user_id: String,
}

#[derive(Clone, PartialEq, Message)]
struct GetProfileResponse {
    #[prost(bool, tag = "1")]
    found: bool,
    #[prost(string, tag = "2")]
    username: String,
}

#[derive(Clone, PartialEq, Message)]
struct PublishEventRequest {
    #[prost(string, tag = "1")]
    event_type: String,
    #[prost(string, tag = "2")]
    payload_json: String,
}

#[async_trait]
pub trait GameService: Send + Sync {
    async fn join_spectator(&self, table_id: &str, user_id: &str) -> Result<(), RpcError>;
    async fn leave_spectator(&self, table_id: &str, user_id: &str) -> Result<(), RpcError>;
    async fn get_table(&self, table_id: &str) -> Result<GetTableResponse, RpcError>;
    async fn get_table_state(
        &self,
        table_id: &str,
        user_id: &str,
    ) -> Result<GetTableStateResponse, RpcError>;
    async fn join_seat(
        &self,
        table_id: &str,
        user_id: &str,
        seat_id: i64,
        buy_in_amount: f64,
    ) -> Result<OkResponse, RpcError>;
    async fn leave_seat(&self, table_id: &str, user_id: &str) -> Result<(), RpcError>;
    async fn submit_action(
        &self,
        table_id: &str,
        user_id: &str,
        action: &str,
        amount: Option<f64>,
    ) -> Result<OkResponse, RpcError>;
    async fn is_muted(&self, table_id: &str, user_id: &str) -> Result<bool, RpcError>;
    async fn list_tables(&self) -> Result<ListTablesResponse, RpcError>;
}

#[async_trait]
pub trait PlayerService: Send + Sync {
    async fn get_profile(&self, user_id: &str) -> Result<Option<String>, RpcError>;
}

#[async_trait]
pub trait EventService: Send + Sync {
    async fn publish_event(&self, event_type: &str, payload: serde_json::Value) -> Result<(), RpcError>;
}

pub struct GrpcGameService {
    channel: Channel,
}

impl GrpcGameService {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl GameService for GrpcGameService {
    async fn join_spectator(&self, table_id: &str, user_id: &str) -> Result<(), RpcError> {
        let req = SpectatorRequest {
            table_id: table_id.to_string(),
            user_id: user_id.to_string(),
        };
        let _: Empty = call(self.channel.clone(), "/game.GameService/JoinSpectator", req).await?;
        Ok(())
    }

    async fn leave_spectator(&self, table_id: &str, user_id: &str) -> Result<(), RpcError> {
        let req = SpectatorRequest {
            table_id: table_id.to_string(),
            user_id: user_id.to_string(),
        };
        let _: Empty = call(self.channel.clone(), "/game.GameService/LeaveSpectator", req).await?;
        Ok(())
    }

    async fn get_table(&self, table_id: &str) -> Result<GetTableResponse, RpcError> {
        let req = TableRequest {
            table_id: table_id.to_string(),
        };
        call(self.channel.clone(), "/game.GameService/GetTable", req).await
    }

    async fn get_table_state(
        &self,
        table_id: &str,
        user_id: &str,
    ) -> Result<GetTableStateResponse, RpcError> {
        let req = TableStateRequest {
            table_id: table_id.to_string(),
            user_id: user_id.to_string(),
        };
        call(self.channel.clone(), "/game.GameService/GetTableState", req).await
    }

    async fn join_seat(
        &self,
        table_id: &str,
        user_id: &str,
        seat_id: i64,
        buy_in_amount: f64,
    ) -> Result<OkResponse, RpcError> {
        let req = JoinSeatRequest {
            table_id: table_id.to_string(),
            user_id: user_id.to_string(),
            seat_id,
            buy_in_amount,
        };
        call(self.channel.clone(), "/game.GameService/JoinSeat", req).await
    }

    async fn leave_seat(&self, table_id: &str, user_id: &str) -> Result<(), RpcError> {
        let req = LeaveSeatRequest {
            table_id: table_id.to_string(),
            user_id: user_id.to_string(),
        };
        let _: Empty = call(self.channel.clone(), "/game.GameService/LeaveSeat", req).await?;
        Ok(())
    }

    async fn submit_action(
        &self,
        table_id: &str,
        user_id: &str,
        action: &str,
        amount: Option<f64>,
    ) -> Result<OkResponse, RpcError> {
        let req = SubmitActionRequest {
            table_id: table_id.to_string(),
            user_id: user_id.to_string(),
            action: action.to_string(),
            has_amount: amount.is_some(),
            amount: amount.unwrap_or_default(),
        };
        call(self.channel.clone(), "/game.GameService/SubmitAction", req).await
    }

    async fn is_muted(&self, table_id: &str, user_id: &str) -> Result<bool, RpcError> {
        let req = TableStateRequest {
            table_id: table_id.to_string(),
            user_id: user_id.to_string(),
        };
        let resp: IsMutedResponse = call(self.channel.clone(), "/game.GameService/IsMuted", req).await?;
        Ok(resp.is_muted)
    }

    async fn list_tables(&self) -> Result<ListTablesResponse, RpcError> {
        call(self.channel.clone(), "/game.GameService/ListTables", Empty {}).await
    }
}

pub struct GrpcPlayerService {
    channel: Channel,
}

impl GrpcPlayerService {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl PlayerService for GrpcPlayerService {
    async fn get_profile(&self, user_id: &str) -> Result<Option<String>, RpcError> {
        let req = GetProfileRequest {
            user_id: user_id.to_string(),
        };
        let resp: GetProfileResponse =
            call(self.channel.clone(), "/player.PlayerService/GetProfile", req).await?;
        Ok(resp.found.then_some(resp.username))
    }
}

pub struct GrpcEventService {
    channel: Channel,
}

impl GrpcEventService {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl EventService for GrpcEventService {
    async fn publish_event(&self, event_type: &str, payload: serde_json::Value) -> Result<(), RpcError> {
        let req = PublishEventRequest {
            event_type: event_type.to_string(),
            payload_json: payload.to_string(),
        };
        let _: Empty = call(self.channel.clone(), "/event.EventService/PublishEvent", req).await?;
        Ok(())
    }
}
