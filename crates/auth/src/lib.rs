//! Credential handling: bearer token issuance/verification and Ed25519
//! proof-of-possession for token requests.

pub mod error;
pub mod jwt;
pub mod signature;
pub mod verifier;

pub use {
    error::AuthError,
    jwt::{IssuedToken, TokenService},
    signature::{check_clock_skew, parse_public_key, verify_challenge, verify_signature},
    verifier::IdentityVerifier,
};
