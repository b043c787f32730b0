//! Process entrypoint: load config, connect the shared store and pub/sub
//! bus, start the presence heartbeat, and serve the HTTP/WebSocket surface.

use std::sync::Arc;
use std::time::Duration;

use tonic::transport::Channel;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use gateway::auth::TokenVerifier;
use gateway::config::{Config, LogFormat};
use gateway::instance::{new_instance_id, run_heartbeat_loop};
use gateway::pubsub::PubSubBus;
use gateway::rate_limit::RateLimiter;
use gateway::server::build_router;
use gateway::services::Services;
use gateway::session::SessionDeps;
use gateway::state::GatewayState;
use gateway::store::RedisStore;

fn init_telemetry(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json().with_target(true)).init(),
        LogFormat::Pretty => registry.with(fmt::layer().with_target(false)).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_telemetry(config.log_format);

    let instance_id = new_instance_id();
    tracing::info!(instance_id = %instance_id, "gateway: starting");

    let store = Arc::new(RedisStore::connect(&config.redis_url).await?);
    let redis_client = redis::Client::open(config.redis_url.as_str())?;

    let state = GatewayState::new(instance_id.clone(), store);

    let bus = Arc::new(PubSubBus::new(
        Arc::new(gateway::pubsub::RedisPubSubTransport::new(redis_client)),
        instance_id.clone(),
    ));
    bus.init(gateway::hubs::pubsub_handlers(state.clone())).await?;

    let game_channel = Channel::from_shared(config.game_service_url.clone())?.connect().await?;
    let player_channel = Channel::from_shared(config.player_service_url.clone())?.connect().await?;
    let event_channel = Channel::from_shared(config.event_service_url.clone())?.connect().await?;
    let services = Services::grpc(game_channel, player_channel, event_channel);

    let verifier = Arc::new(TokenVerifier::new(config.jwt.clone()));
    let rate_limiter = Arc::new(RateLimiter::new(
        state.store.clone(),
        config.rate_limit_window,
        config.rate_limit_max,
    ));

    let heartbeat_state = state.clone();
    let heartbeat_interval = config.heartbeat_interval.max(Duration::from_secs(1));
    tokio::spawn(run_heartbeat_loop(heartbeat_state, heartbeat_interval));

    let deps = SessionDeps {
        state,
        verifier,
        services,
        rate_limiter,
        bus,
        auth_timeout: config.auth_timeout,
        heartbeat_interval: config.heartbeat_interval,
    };

    let app = build_router(deps);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "gateway: listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
