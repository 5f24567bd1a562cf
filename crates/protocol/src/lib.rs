//! Wire protocol shared by the relay and its clients.
//!
//! Frames travel as binary WebSocket messages. Each frame carries exactly one
//! [`Envelope`], encoded with `postcard`.

pub mod codec;
pub mod envelope;

pub use {
    codec::{CodecError, decode, decode_bounded, encode},
    envelope::{Envelope, Identity, MessageType},
};

pub const PROTOCOL_VERSION: u32 = 1;

/// Interval between server-initiated WebSocket pings.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;
/// A connection silent for this long is closed.
pub const IDLE_TIMEOUT_SECS: u64 = 90;
/// Frames buffered per session before delivery starts dropping.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;
/// Largest inbound frame accepted from a client (64 KiB).
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Prefix of the string a client signs to obtain a bearer token:
/// `meshrelay:auth:{user_id}:{timestamp}`.
pub const AUTH_CHALLENGE_PREFIX: &str = "meshrelay:auth";

/// Build the exact byte string a client signs when requesting a token.
pub fn auth_challenge(user_id: &str, timestamp: i64) -> String {
    format!("{AUTH_CHALLENGE_PREFIX}:{user_id}:{timestamp}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_format() {
        assert_eq!(auth_challenge("u1", 1700000000), "meshrelay:auth:u1:1700000000");
    }
}
