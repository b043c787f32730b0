//! Operational HTTP surface (A4): `/healthz`, `/readyz`, and the `/ws`
//! upgrade route, wrapped in the standard `tower-http` middleware stack.

use axum::extract::State;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::session::SessionDeps;
use crate::ws::ws_upgrade_handler;

/// Builds the full router: health/readiness probes plus `/ws`, under the
/// ambient middleware stack every HTTP surface in this codebase carries.
pub fn build_router(deps: SessionDeps) -> Router {
    let router = Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .route("/ws", get(ws_upgrade_handler))
        .with_state(deps);

    apply_middleware_stack(router)
}

async fn healthz_handler() -> impl IntoResponse {
    StatusCode::OK
}

/// Ready only once a round trip to the shared store succeeds.
async fn readyz_handler(State(deps): State<SessionDeps>) -> impl IntoResponse {
    match deps.state.store.get("gateway:readyz:probe").await {
        Ok(_) => (StatusCode::OK, Json(serde_json::json!({ "ready": true }))).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "ready": false, "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// Layer order (outermost -> innermost for requests): catch-panic, sensitive
/// headers, request-id generation, trace, CORS, propagate request-id,
/// security headers, compression.
fn apply_middleware_stack(router: Router) -> Router {
    router
        .layer(CompressionLayer::new())
        .layer(SetResponseHeaderLayer::overriding(
            header::HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(
            TraceLayer::new_for_http()
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(SetSensitiveHeadersLayer::new([
            header::AUTHORIZATION,
            header::COOKIE,
            header::SET_COOKIE,
        ]))
        .layer(CatchPanicLayer::new())
}
