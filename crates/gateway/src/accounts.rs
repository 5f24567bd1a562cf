//! Account endpoints: registration, public key lookup and token issuance.

use std::sync::Arc;

use {
    axum::{
        Json,
        extract::{Path, State, rejection::JsonRejection},
        http::StatusCode,
        response::{IntoResponse, Response},
    },
    meshrelay_auth::{AuthError, check_clock_skew, parse_public_key, verify_challenge},
    meshrelay_store::{NewUser, StoreError},
    serde::Deserialize,
    tracing::{error, info, warn},
};

use crate::state::GatewayState;

// ── Errors ───────────────────────────────────────────────────────────────────

/// JSON error response: `{"error": message}` with a status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(format!("invalid request body: {}", rejection.body_text()))
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(what) => {
                Self::new(StatusCode::CONFLICT, format!("{what} already exists"))
            },
            StoreError::Database(e) => {
                error!(error = %e, "database error");
                Self::internal()
            },
        }
    }
}

// ── Registration ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub public_key: String,
    #[serde(default)]
    pub signing_key: String,
}

pub async fn register_handler(
    State(state): State<Arc<GatewayState>>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = body?;
    let username = req.username.trim();
    if username.is_empty() || req.public_key.is_empty() || req.signing_key.is_empty() {
        return Err(ApiError::bad_request(
            "username, public_key and signing_key are required",
        ));
    }
    parse_public_key(&req.signing_key)
        .map_err(|e| ApiError::bad_request(format!("invalid signing_key: {e}")))?;

    let user = state
        .services
        .users
        .create_user(NewUser {
            username: username.to_string(),
            public_key: req.public_key,
            signing_key: req.signing_key,
        })
        .await?;

    info!(user_id = %user.id, username = %user.username, "user registered");
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "status": "created", "user_id": user.id })),
    ))
}

// ── Key lookup ───────────────────────────────────────────────────────────────

pub async fn public_key_handler(
    State(state): State<Arc<GatewayState>>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let public_key = state
        .services
        .users
        .public_key(&user_id)
        .await?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "user not found"))?;
    Ok(Json(serde_json::json!({
        "user_id": user_id,
        "public_key": public_key,
    })))
}

// ── Token issuance ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    #[serde(default)]
    pub user_id: String,
    pub timestamp: i64,
    #[serde(default)]
    pub signature: String,
}

/// Exchange a signed challenge for a bearer token.
pub async fn token_handler(
    State(state): State<Arc<GatewayState>>,
    body: Result<Json<TokenRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = body?;
    if req.user_id.is_empty() || req.signature.is_empty() {
        return Err(ApiError::bad_request("user_id and signature are required"));
    }

    let skew = state.max_clock_skew_secs;
    check_clock_skew(req.timestamp, skew).map_err(|e| {
        warn!(user_id = %req.user_id, reason = e.reason(), "token request rejected");
        ApiError::unauthorized("timestamp expired")
    })?;

    let signing_key = state
        .services
        .users
        .signing_key(&req.user_id)
        .await?
        .ok_or_else(|| ApiError::unauthorized("unknown user"))?;

    verify_challenge(&signing_key, &req.user_id, req.timestamp, &req.signature, skew).map_err(
        |e| {
            warn!(user_id = %req.user_id, reason = e.reason(), "token request rejected");
            match e {
                AuthError::ClockSkew { .. } => ApiError::unauthorized("timestamp expired"),
                _ => ApiError::unauthorized("invalid signature"),
            }
        },
    )?;

    let issued = state.services.tokens.issue(&req.user_id).map_err(|e| {
        error!(user_id = %req.user_id, error = %e, "token issuance failed");
        ApiError::internal()
    })?;
    info!(user_id = %req.user_id, "token issued");
    Ok(Json(issued))
}
