use {
    axum::{
        Json,
        http::StatusCode,
        response::{IntoResponse, Response},
    },
    meshrelay_auth::{AuthError, IdentityVerifier},
    meshrelay_protocol::Identity,
    tracing::debug,
};

// ── Connect authorization ────────────────────────────────────────────────────

/// Authenticate a WebSocket connect request from its `token` query parameter.
///
/// A missing or blank token is rejected without calling the verifier.
pub async fn authorize_connect(
    verifier: &dyn IdentityVerifier,
    provided_token: Option<&str>,
) -> Result<Identity, AuthError> {
    let token = provided_token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MissingCredential)?;
    let identity = verifier.verify(token).await?;
    debug!(identity = %identity, "connect authorized");
    Ok(identity)
}

/// Client-facing message for a failed connect.
pub fn rejection_message(err: &AuthError) -> &'static str {
    match err {
        AuthError::MissingCredential => "token is required",
        _ => "invalid or expired token",
    }
}

/// 401 response sent before the upgrade when authentication fails.
pub fn unauthorized(err: &AuthError) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "error": rejection_message(err) })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use {super::*, async_trait::async_trait};

    struct Fixed;

    #[async_trait]
    impl IdentityVerifier for Fixed {
        async fn verify(&self, credential: &str) -> Result<Identity, AuthError> {
            match credential {
                "good" => Ok(Identity::new("alice")),
                _ => Err(AuthError::InvalidToken),
            }
        }
    }

    #[tokio::test]
    async fn missing_token_rejected() {
        let err = authorize_connect(&Fixed, None).await.unwrap_err();
        assert_eq!(err.reason(), "token_missing");
        assert_eq!(rejection_message(&err), "token is required");
    }

    #[tokio::test]
    async fn blank_token_rejected() {
        let err = authorize_connect(&Fixed, Some("  ")).await.unwrap_err();
        assert!(matches!(err, AuthError::MissingCredential));
    }

    #[tokio::test]
    async fn invalid_token_rejected() {
        let err = authorize_connect(&Fixed, Some("bad")).await.unwrap_err();
        assert_eq!(rejection_message(&err), "invalid or expired token");
    }

    #[tokio::test]
    async fn valid_token_yields_identity() {
        let identity = authorize_connect(&Fixed, Some("good")).await.unwrap();
        assert_eq!(identity.as_str(), "alice");
    }

    #[test]
    fn unauthorized_is_401() {
        let resp = unauthorized(&AuthError::InvalidToken);
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
