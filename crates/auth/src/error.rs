#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("credential missing")]
    MissingCredential,
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("token issuance failed: {0}")]
    Issue(String),
    #[error("invalid public key: {0}")]
    InvalidKey(String),
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    #[error("timestamp outside the allowed window ({skew_secs}s skew)")]
    ClockSkew { skew_secs: u64 },
}

impl AuthError {
    /// Short machine-readable reason, suitable for logs and error bodies.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MissingCredential => "token_missing",
            Self::InvalidToken => "token_invalid",
            Self::Issue(_) => "token_issue_failed",
            Self::InvalidKey(_) => "key_invalid",
            Self::InvalidSignature(_) => "signature_invalid",
            Self::ClockSkew { .. } => "timestamp_expired",
        }
    }
}
