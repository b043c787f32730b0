#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end tests driving a real gateway instance over a bound TCP socket:
//! the auth handshake, disconnect cleanup, health/readiness, and cross-instance
//! broadcast with loop suppression between two gateway instances sharing one
//! in-memory store and pub/sub bus.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use gateway::auth::TokenVerifier;
use gateway::config::JwtConfig;
use gateway::error::RpcError;
use gateway::hubs::pubsub_handlers;
use gateway::pubsub::{MemoryPubSubTransport, PubSubBus};
use gateway::rate_limit::RateLimiter;
use gateway::server::build_router;
use gateway::services::{
    EventService, GameService, GetTableResponse, GetTableStateResponse, ListTablesResponse,
    OkResponse, PlayerService, Services,
};
use gateway::session::SessionDeps;
use gateway::state::GatewayState;
use gateway::store::{MemoryStore, SharedStore};

const HS256_SECRET: &str = "test-secret";

/// Minimal `GameService` double for exercising the WS surface end to end;
/// only `table_state_json` is configurable, which is all these tests need.
#[derive(Default)]
struct TestGameService {
    table_state_json: Mutex<String>,
    submitted_actions: Mutex<Vec<(String, String, Option<f64>)>>,
}

impl TestGameService {
    fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GameService for TestGameService {
    async fn join_spectator(&self, _table_id: &str, _user_id: &str) -> Result<(), RpcError> {
        Ok(())
    }
    async fn leave_spectator(&self, _table_id: &str, _user_id: &str) -> Result<(), RpcError> {
        Ok(())
    }
    async fn get_table(&self, _table_id: &str) -> Result<GetTableResponse, RpcError> {
        Ok(GetTableResponse { state_json: "{}".to_string() })
    }
    async fn get_table_state(
        &self,
        _table_id: &str,
        _user_id: &str,
    ) -> Result<GetTableStateResponse, RpcError> {
        Ok(GetTableStateResponse {
            state_json: self.table_state_json.lock().unwrap().clone(),
            has_hole_cards: false,
            hole_cards_json: String::new(),
            hand_id: String::new(),
        })
    }
    async fn join_seat(
        &self,
        _table_id: &str,
        _user_id: &str,
        _seat_id: i64,
        _buy_in_amount: f64,
    ) -> Result<OkResponse, RpcError> {
        Ok(OkResponse { ok: true, error: String::new() })
    }
    async fn leave_seat(&self, _table_id: &str, _user_id: &str) -> Result<(), RpcError> {
        Ok(())
    }
    async fn submit_action(
        &self,
        table_id: &str,
        _user_id: &str,
        action: &str,
        amount: Option<f64>,
    ) -> Result<OkResponse, RpcError> {
        self.submitted_actions
            .lock()
            .unwrap()
            .push((table_id.to_string(), action.to_string(), amount));
        Ok(OkResponse { ok: true, error: String::new() })
    }
    async fn is_muted(&self, _table_id: &str, _user_id: &str) -> Result<bool, RpcError> {
        Ok(false)
    }
    async fn list_tables(&self) -> Result<ListTablesResponse, RpcError> {
        Ok(ListTablesResponse { tables_json: "[]".to_string() })
    }
}

#[derive(Default)]
struct TestPlayerService;

#[async_trait]
impl PlayerService for TestPlayerService {
    async fn get_profile(&self, user_id: &str) -> Result<Option<String>, RpcError> {
        Ok(Some(user_id.to_string()))
    }
}

#[derive(Default)]
struct TestEventService;

#[async_trait]
impl EventService for TestEventService {
    async fn publish_event(&self, _event_type: &str, _payload: serde_json::Value) -> Result<(), RpcError> {
        Ok(())
    }
}

fn jwt_config() -> JwtConfig {
    JwtConfig {
        public_key_pem: None,
        hs256_secret: Some(HS256_SECRET.to_string().into()),
        issuer: None,
        audience: None,
        idp_base_url: None,
        idp_realm: None,
    }
}

fn token_for(user_id: &str) -> String {
    let claims = json!({ "sub": user_id, "username": user_id });
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(HS256_SECRET.as_bytes()),
    )
    .unwrap()
}

/// Starts one gateway instance on an ephemeral port, backed by the given
/// shared store and pub/sub transport so the caller can wire up a second
/// instance against the same backing store for cross-instance tests.
async fn start_instance(
    instance_id: &str,
    store: Arc<dyn SharedStore>,
    transport: Arc<MemoryPubSubTransport>,
    game: Arc<TestGameService>,
) -> (SocketAddr, Arc<PubSubBus>) {
    let state = GatewayState::new(instance_id.to_string(), store.clone());
    let bus = Arc::new(PubSubBus::new(transport, instance_id.to_string()));
    bus.init(pubsub_handlers(state.clone())).await.unwrap();

    let services = Services {
        game,
        player: Arc::new(TestPlayerService) as Arc<dyn PlayerService>,
        event: Arc::new(TestEventService) as Arc<dyn EventService>,
    };
    let verifier = Arc::new(TokenVerifier::new(jwt_config()));
    let rate_limiter = Arc::new(RateLimiter::new(store, Duration::from_millis(10_000), 1000));

    let deps = SessionDeps {
        state,
        verifier,
        services,
        rate_limiter,
        bus: bus.clone(),
        auth_timeout: Duration::from_secs(2),
        heartbeat_interval: Duration::from_secs(30),
    };

    let app = build_router(deps);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    (addr, bus)
}

#[tokio::test]
async fn healthz_and_readyz_report_ok_against_a_live_store() {
    let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
    let transport = Arc::new(MemoryPubSubTransport::new());
    let (addr, _bus) = start_instance("inst-1", store, transport, Arc::new(TestGameService::new())).await;

    let health = reqwest::get(format!("http://{addr}/healthz")).await.unwrap();
    assert_eq!(health.status(), 200);

    let ready = reqwest::get(format!("http://{addr}/readyz")).await.unwrap();
    assert_eq!(ready.status(), 200);
}

#[tokio::test]
async fn query_token_auth_handshake_returns_welcome() {
    let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
    let transport = Arc::new(MemoryPubSubTransport::new());
    let (addr, _bus) = start_instance("inst-1", store, transport, Arc::new(TestGameService::new())).await;

    let token = token_for("alice");
    let url = format!("ws://{addr}/ws?token={token}");
    let (mut socket, _resp) = connect_async(url).await.unwrap();

    let msg = socket.next().await.unwrap().unwrap();
    let text = msg.into_text().unwrap();
    assert!(text.contains("Welcome"));
    assert!(text.contains("alice"));
}

#[tokio::test]
async fn frame_auth_handshake_accepts_authenticate_message() {
    let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
    let transport = Arc::new(MemoryPubSubTransport::new());
    let (addr, _bus) = start_instance("inst-1", store, transport, Arc::new(TestGameService::new())).await;

    let (mut socket, _resp) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    let token = token_for("bob");
    socket
        .send(Message::text(json!({"type": "Authenticate", "token": token}).to_string()))
        .await
        .unwrap();

    let msg = socket.next().await.unwrap().unwrap();
    assert!(msg.into_text().unwrap().contains("Welcome"));
}

#[tokio::test]
async fn missing_auth_frame_closes_the_socket_after_timeout() {
    let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
    let transport = Arc::new(MemoryPubSubTransport::new());
    let (addr, _bus) = start_instance("inst-1", store, transport, Arc::new(TestGameService::new())).await;

    let (mut socket, _resp) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    // Send nothing; the server's auth_timeout is 2s in this harness.
    let msg = tokio::time::timeout(Duration::from_secs(4), socket.next())
        .await
        .expect("server should have closed by now")
        .unwrap()
        .unwrap();
    let Message::Close(Some(frame)) = msg else {
        panic!("expected a close frame, got {msg:?}");
    };
    assert_eq!(u16::from(frame.code), 1008);
    assert_eq!(frame.reason.as_ref(), "Authentication required");
}

#[tokio::test]
async fn disconnect_clears_presence_and_subscriptions() {
    let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
    let transport = Arc::new(MemoryPubSubTransport::new());
    let game = Arc::new(TestGameService::new());
    let (addr, _bus) =
        start_instance("inst-1", store.clone(), transport, game.clone()).await;

    let token = token_for("carol");
    let (mut socket, _resp) = connect_async(format!("ws://{addr}/ws?token={token}")).await.unwrap();
    let _welcome = socket.next().await.unwrap().unwrap();

    socket
        .send(Message::text(json!({"type": "SubscribeTable", "tableId": "T1"}).to_string()))
        .await
        .unwrap();
    let _snapshot = socket.next().await.unwrap().unwrap();

    assert_eq!(store.smembers("gateway:byuser:carol").await.unwrap().len(), 1);
    assert_eq!(store.smembers("gateway:subscriptions:table:T1").await.unwrap().len(), 1);

    socket.close(None).await.unwrap();
    // Give the server task a moment to run its cleanup path.
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(store.smembers("gateway:byuser:carol").await.unwrap().is_empty());
    assert!(store
        .smembers("gateway:subscriptions:table:T1")
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        game.submitted_actions.lock().unwrap().len(),
        0,
        "leave_spectator is fire-and-forget and not tracked as a submitted action"
    );
}

#[tokio::test]
async fn chat_message_reaches_the_other_instance_once_with_no_echo_back_to_the_sender() {
    let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
    let transport = Arc::new(MemoryPubSubTransport::new());

    let game_a = Arc::new(TestGameService::new());
    *game_a.table_state_json.lock().unwrap() = json!({"spectators": ["alice"]}).to_string();

    let (addr_a, _bus_a) =
        start_instance("inst-a", store.clone(), transport.clone(), game_a).await;
    let (addr_b, _bus_b) =
        start_instance("inst-b", store.clone(), transport, Arc::new(TestGameService::new())).await;

    let token_alice = token_for("alice");
    let (mut alice, _) = connect_async(format!("ws://{addr_a}/ws?token={token_alice}")).await.unwrap();
    let _welcome_a = alice.next().await.unwrap().unwrap();
    alice
        .send(Message::text(json!({"type": "SubscribeChat", "tableId": "T1"}).to_string()))
        .await
        .unwrap();
    let _subscribed_a = alice.next().await.unwrap().unwrap();

    let token_bob = token_for("bob");
    let (mut bob, _) = connect_async(format!("ws://{addr_b}/ws?token={token_bob}")).await.unwrap();
    let _welcome_b = bob.next().await.unwrap().unwrap();
    bob.send(Message::text(json!({"type": "SubscribeChat", "tableId": "T1"}).to_string()))
        .await
        .unwrap();
    let _subscribed_b = bob.next().await.unwrap().unwrap();

    alice
        .send(Message::text(json!({"type": "ChatSend", "tableId": "T1", "message": "hello from A"}).to_string()))
        .await
        .unwrap();

    // Alice sees her own message once, delivered locally by instance A.
    let alice_frame = alice.next().await.unwrap().unwrap().into_text().unwrap();
    assert!(alice_frame.contains("ChatMessage"));
    assert!(alice_frame.contains("hello from A"));

    // Bob, on the other instance, sees it once via the cross-instance bus.
    let bob_frame = bob.next().await.unwrap().unwrap().into_text().unwrap();
    assert!(bob_frame.contains("ChatMessage"));
    assert!(bob_frame.contains("hello from A"));

    // Instance A suppresses its own echo: Alice gets nothing further.
    assert!(tokio::time::timeout(Duration::from_millis(200), alice.next())
        .await
        .is_err());
}
