//! Gateway: the realtime WebSocket fan-out engine fronting the card-table
//! backend services.
//!
//! Lifecycle:
//! 1. Load + validate config from the process environment.
//! 2. Connect the shared store (Redis) and the pub/sub bus.
//! 3. Start the HTTP server: health/readiness, then the `/ws` upgrade route.
//! 4. Each accepted socket runs the session lifecycle state machine, which
//!    attaches the table/chat/lobby hubs once authenticated.
//! 5. A background heartbeat task keeps this instance's presence row fresh
//!    and sweeps stale instances left behind by crashes.

pub mod auth;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod hubs;
pub mod instance;
pub mod pubsub;
pub mod rate_limit;
pub mod router;
pub mod server;
pub mod services;
pub mod session;
pub mod state;
pub mod store;
pub mod subscriptions;
pub mod ws;
