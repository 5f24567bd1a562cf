use std::{sync::Arc, time::Instant};

use {
    meshrelay_auth::{IdentityVerifier, TokenService},
    meshrelay_config::{RelayConfig, RelaySettings},
    meshrelay_store::{MessageStore, SqliteMessageStore, SqliteUserStore, UserStore},
    sqlx::SqlitePool,
    tokio_util::sync::CancellationToken,
};

use crate::{connection::CloseReason, registry::SessionRegistry, router::MessageRouter};

// ── Services ─────────────────────────────────────────────────────────────────

/// External collaborators the gateway talks to through traits.
#[derive(Clone)]
pub struct GatewayServices {
    /// Authenticates WebSocket connect requests.
    pub verifier: Arc<dyn IdentityVerifier>,
    /// Issues tokens for `POST /token`.
    pub tokens: Arc<TokenService>,
    pub users: Arc<dyn UserStore>,
    pub messages: Arc<dyn MessageStore>,
    /// Pinged by the health endpoint when present.
    pub database: Option<SqlitePool>,
}

impl GatewayServices {
    /// SQLite-backed stores sharing `pool`, with `tokens` as the verifier.
    pub fn sqlite(pool: SqlitePool, tokens: Arc<TokenService>) -> Self {
        Self {
            verifier: tokens.clone(),
            tokens,
            users: Arc::new(SqliteUserStore::new(pool.clone())),
            messages: Arc::new(SqliteMessageStore::new(pool.clone())),
            database: Some(pool),
        }
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn IdentityVerifier>) -> Self {
        self.verifier = verifier;
        self
    }
}

// ── Gateway state ────────────────────────────────────────────────────────────

/// Shared gateway runtime state, wrapped in Arc for use across async tasks.
pub struct GatewayState {
    /// Online sessions, keyed by identity.
    pub registry: Arc<SessionRegistry>,
    pub router: MessageRouter,
    pub services: GatewayServices,
    /// Heartbeat, queue and frame limits.
    pub relay: RelaySettings,
    /// Allowed distance between a token request timestamp and server time.
    pub max_clock_skew_secs: u64,
    /// Server version string.
    pub version: String,
    pub started_at: Instant,
    /// Cancelled once to stop the server and every connection task.
    pub shutdown: CancellationToken,
}

impl GatewayState {
    pub fn new(config: &RelayConfig, services: GatewayServices) -> Arc<Self> {
        let registry = Arc::new(SessionRegistry::new());
        let router = MessageRouter::new(Arc::clone(&registry), Arc::clone(&services.messages))
            .with_reject_empty_recipient(config.relay.reject_empty_recipient);

        Arc::new(Self {
            registry,
            router,
            services,
            relay: config.relay.clone(),
            max_clock_skew_secs: config.auth.max_clock_skew_secs,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: Instant::now(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Number of online sessions.
    pub async fn session_count(&self) -> usize {
        self.registry.size().await
    }

    /// Close every session with a going-away code. Returns how many were
    /// closed.
    pub async fn close_all_sessions(&self) -> usize {
        self.registry.close_all(CloseReason::Shutdown).await
    }
}
