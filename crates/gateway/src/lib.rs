//! Gateway: WebSocket relay server, session registry and message routing.
//!
//! Lifecycle of a connection:
//! 1. `GET /ws?token=…` is authenticated before the upgrade (401 on failure)
//! 2. The upgraded connection registers its identity, evicting any older
//!    session for the same identity
//! 3. Each binary frame is decoded and handed to the [`router::MessageRouter`]
//! 4. On close, read error, idle timeout, eviction or shutdown the session is
//!    unregistered exactly once
//!
//! Account endpoints (`/register`, `/keys/{id}`, `/token`) and `/health` share
//! the same HTTP server.

pub mod accounts;
pub mod auth;
pub mod connection;
pub mod heartbeat;
pub mod metrics;
pub mod registry;
pub mod router;
pub mod server;
pub mod state;
pub mod ws;

pub use {
    registry::{Session, SessionRegistry},
    router::{DeliveryOutcome, MessageRouter, RouteError, RouteReport},
    server::{build_gateway_app, serve_gateway, start_gateway},
    state::{GatewayServices, GatewayState},
};
