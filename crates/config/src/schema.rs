//! Config schema for the relay server.

use std::time::Duration;

use {
    secrecy::SecretString,
    serde::Deserialize,
};

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub relay: RelaySettings,
}

/// HTTP/WebSocket listener.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlx connection URL.
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://meshrelay.db?mode=rwc".into(),
        }
    }
}

/// Bearer token issuance and verification.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC key for issued tokens. Falls back to `JWT_SECRET` from the
    /// environment when unset.
    pub jwt_secret: Option<SecretString>,
    pub issuer: String,
    pub token_ttl_secs: u64,
    /// How far a signed token request's timestamp may drift from server time.
    pub max_clock_skew_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            issuer: "meshrelay".into(),
            token_ttl_secs: 15 * 60,
            max_clock_skew_secs: 5 * 60,
        }
    }
}

impl AuthConfig {
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}

/// Session and routing behaviour.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    pub heartbeat_interval_secs: u64,
    pub idle_timeout_secs: u64,
    /// Bounded per-session outbound queue length.
    pub outbound_queue: usize,
    /// Reject text messages that carry no recipient instead of echoing them.
    pub reject_empty_recipient: bool,
    pub max_frame_bytes: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: meshrelay_protocol::HEARTBEAT_INTERVAL_SECS,
            idle_timeout_secs: meshrelay_protocol::IDLE_TIMEOUT_SECS,
            outbound_queue: meshrelay_protocol::OUTBOUND_QUEUE_CAPACITY,
            reject_empty_recipient: false,
            max_frame_bytes: meshrelay_protocol::MAX_FRAME_BYTES,
        }
    }
}

impl RelaySettings {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl RelayConfig {
    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let relay = &self.relay;
        if relay.heartbeat_interval_secs == 0 {
            anyhow::bail!("relay.heartbeat_interval_secs must be greater than zero");
        }
        if relay.idle_timeout_secs < relay.heartbeat_interval_secs {
            anyhow::bail!(
                "relay.idle_timeout_secs ({}) must be at least relay.heartbeat_interval_secs ({})",
                relay.idle_timeout_secs,
                relay.heartbeat_interval_secs
            );
        }
        if relay.outbound_queue == 0 {
            anyhow::bail!("relay.outbound_queue must be greater than zero");
        }
        if relay.max_frame_bytes == 0 {
            anyhow::bail!("relay.max_frame_bytes must be greater than zero");
        }
        if self.auth.token_ttl_secs == 0 {
            anyhow::bail!("auth.token_ttl_secs must be greater than zero");
        }
        Ok(())
    }
}
