use {async_trait::async_trait, meshrelay_protocol::Identity};

use crate::error::AuthError;

/// Turns a presented credential into an authenticated identity.
///
/// Implementations are shared across every connection handshake and must not
/// rely on per-call mutable state.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, credential: &str) -> Result<Identity, AuthError>;
}
