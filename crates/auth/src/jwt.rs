//! HS256 bearer tokens binding a user id.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use {
    async_trait::async_trait,
    jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation},
    meshrelay_config::AuthConfig,
    meshrelay_protocol::Identity,
    secrecy::{ExposeSecret, SecretString},
    serde::{Deserialize, Serialize},
    tracing::{debug, warn},
};

use crate::{error::AuthError, verifier::IdentityVerifier};

/// Used only when neither the config file nor `JWT_SECRET` provides a key.
const DEV_FALLBACK_SECRET: &str = "CHANGE_ME_IN_PRODUCTION";

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    user_id: String,
    iss: String,
    iat: u64,
    exp: u64,
}

/// A freshly issued token and its lifetime.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub expires_in: u64,
}

/// Issues and verifies bearer tokens.
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    issuer: String,
    ttl: Duration,
}

impl TokenService {
    pub fn new(secret: &SecretString, issuer: impl Into<String>, ttl: Duration) -> Self {
        let key = secret.expose_secret().as_bytes();
        let issuer = issuer.into();
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss"]);
        Self {
            encoding: EncodingKey::from_secret(key),
            decoding: DecodingKey::from_secret(key),
            validation,
            issuer,
            ttl,
        }
    }

    /// Build from config. The key is taken from `auth.jwt_secret`, then the
    /// `JWT_SECRET` environment variable, then a development fallback.
    pub fn from_config(config: &AuthConfig) -> Self {
        let secret = match &config.jwt_secret {
            Some(secret) => secret.clone(),
            None => match std::env::var("JWT_SECRET") {
                Ok(val) if !val.is_empty() => SecretString::new(val),
                _ => {
                    warn!("no JWT secret configured, using insecure development default");
                    SecretString::new(DEV_FALLBACK_SECRET.to_string())
                },
            },
        };
        Self::new(&secret, config.issuer.clone(), config.token_ttl())
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a token for `user_id` valid for the configured TTL.
    pub fn issue(&self, user_id: &str) -> Result<IssuedToken, AuthError> {
        let iat = unix_now();
        let claims = Claims {
            user_id: user_id.to_string(),
            iss: self.issuer.clone(),
            iat,
            exp: iat + self.ttl.as_secs(),
        };
        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Issue(e.to_string()))?;
        Ok(IssuedToken {
            token,
            expires_in: self.ttl.as_secs(),
        })
    }

    /// Validate signature, issuer and expiry; return the bound user id.
    pub fn validate(&self, token: &str) -> Result<Identity, AuthError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|e| {
                debug!(error = %e, "token rejected");
                AuthError::InvalidToken
            })?;
        if data.claims.user_id.is_empty() {
            return Err(AuthError::InvalidToken);
        }
        Ok(Identity::new(data.claims.user_id))
    }
}

#[async_trait]
impl IdentityVerifier for TokenService {
    async fn verify(&self, credential: &str) -> Result<Identity, AuthError> {
        if credential.is_empty() {
            return Err(AuthError::MissingCredential);
        }
        self.validate(credential)
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
