//! Ed25519 proof-of-possession for token requests.
//!
//! Keys and signatures travel as standard base64. A client proves ownership of
//! its registered signing key by signing
//! [`meshrelay_protocol::auth_challenge`] for its user id and the current
//! time.

use {
    base64::{Engine, engine::general_purpose::STANDARD},
    ed25519_dalek::{PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH, Signature, VerifyingKey},
};

use crate::{error::AuthError, jwt::unix_now};

/// Parse a base64 Ed25519 public key, rejecting wrong lengths and points
/// that are not valid curve points.
pub fn parse_public_key(public_key_b64: &str) -> Result<VerifyingKey, AuthError> {
    let key_bytes = STANDARD
        .decode(public_key_b64)
        .map_err(|e| AuthError::InvalidKey(format!("bad encoding: {e}")))?;
    let key_bytes: [u8; PUBLIC_KEY_LENGTH] = key_bytes.as_slice().try_into().map_err(|_| {
        AuthError::InvalidKey(format!(
            "got {} bytes, want {PUBLIC_KEY_LENGTH}",
            key_bytes.len()
        ))
    })?;
    VerifyingKey::from_bytes(&key_bytes).map_err(|e| AuthError::InvalidKey(e.to_string()))
}

/// Verify `signature_b64` over `message` against `public_key_b64`.
pub fn verify_signature(
    public_key_b64: &str,
    message: &[u8],
    signature_b64: &str,
) -> Result<(), AuthError> {
    let key = parse_public_key(public_key_b64)?;

    let sig_bytes = STANDARD
        .decode(signature_b64)
        .map_err(|e| AuthError::InvalidSignature(format!("bad encoding: {e}")))?;
    let sig_bytes: [u8; SIGNATURE_LENGTH] = sig_bytes.as_slice().try_into().map_err(|_| {
        AuthError::InvalidSignature(format!(
            "got {} bytes, want {SIGNATURE_LENGTH}",
            sig_bytes.len()
        ))
    })?;
    let signature = Signature::from_bytes(&sig_bytes);

    key.verify_strict(message, &signature)
        .map_err(|_| AuthError::InvalidSignature("verification failed".into()))
}

/// Reject `timestamp` (unix seconds) if it is more than `max_skew_secs` away
/// from server time in either direction.
pub fn check_clock_skew(timestamp: i64, max_skew_secs: u64) -> Result<(), AuthError> {
    let now = i64::try_from(unix_now()).unwrap_or(i64::MAX);
    if now.abs_diff(timestamp) > max_skew_secs {
        return Err(AuthError::ClockSkew {
            skew_secs: max_skew_secs,
        });
    }
    Ok(())
}

/// Check a signed token request: the timestamp must be within `max_skew_secs`
/// of server time and the signature must cover the auth challenge for
/// `user_id` at that timestamp.
pub fn verify_challenge(
    public_key_b64: &str,
    user_id: &str,
    timestamp: i64,
    signature_b64: &str,
    max_skew_secs: u64,
) -> Result<(), AuthError> {
    check_clock_skew(timestamp, max_skew_secs)?;
    let message = meshrelay_protocol::auth_challenge(user_id, timestamp);
    verify_signature(public_key_b64, message.as_bytes(), signature_b64)
}
