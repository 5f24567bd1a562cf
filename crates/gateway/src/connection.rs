//! Per-connection handle shared between the lifecycle task, the registry and
//! the router.

use std::{
    fmt,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering},
    },
    time::Instant,
};

use {
    bytes::Bytes,
    meshrelay_protocol::Identity,
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
};

/// Shared reference to a live connection. Two handles refer to the same
/// connection only if they point at the same allocation.
pub type ConnectionHandle = Arc<Connection>;

// ── State machine ────────────────────────────────────────────────────────────

/// Lifecycle of one transport connection. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Authenticating = 1,
    Active = 2,
    Closing = 3,
    Closed = 4,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connecting,
            1 => Self::Authenticating,
            2 => Self::Active,
            3 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Why a connection left the `Active` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer sent a close frame or the stream ended.
    PeerClosed,
    ReadError,
    WriteError,
    /// A newer connection registered for the same identity.
    Evicted,
    IdleTimeout,
    Shutdown,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PeerClosed => "peer_closed",
            Self::ReadError => "read_error",
            Self::WriteError => "write_error",
            Self::Evicted => "evicted",
            Self::IdleTimeout => "idle_timeout",
            Self::Shutdown => "shutdown",
        }
    }

    /// WebSocket close code sent to the peer.
    pub fn close_code(self) -> u16 {
        match self {
            Self::PeerClosed | Self::ReadError => 1000,
            Self::Shutdown => 1001,
            Self::WriteError => 1011,
            Self::Evicted => 4000,
            Self::IdleTimeout => 4001,
        }
    }
}

/// Why an outbound frame could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("outbound queue full")]
    Full,
    #[error("connection closed")]
    Closed,
}

// ── Connection ───────────────────────────────────────────────────────────────

pub struct Connection {
    conn_id: String,
    identity: OnceLock<Identity>,
    state: AtomicU8,
    close_reason: OnceLock<CloseReason>,
    /// Bounded queue drained by this connection's writer task.
    tx: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
    connected_at: Instant,
    /// Set by any inbound traffic, cleared by each heartbeat check.
    alive: AtomicBool,
    dropped_frames: AtomicU64,
}

impl Connection {
    /// Create a connection in `Connecting` state together with the receiving
    /// end of its outbound queue.
    pub fn new(queue_capacity: usize) -> (ConnectionHandle, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let conn = Arc::new(Self {
            conn_id: uuid::Uuid::new_v4().to_string(),
            identity: OnceLock::new(),
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            close_reason: OnceLock::new(),
            tx,
            cancel: CancellationToken::new(),
            connected_at: Instant::now(),
            alive: AtomicBool::new(true),
            dropped_frames: AtomicU64::new(0),
        });
        (conn, rx)
    }

    pub fn conn_id(&self) -> &str {
        &self.conn_id
    }

    /// The identity bound at authentication, if any.
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.get()
    }

    /// Bind the authenticated identity. Only the lifecycle does this, once.
    pub(crate) fn bind_identity(&self, identity: Identity) -> bool {
        self.identity.set(identity).is_ok()
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move from `from` to `to`. Fails if the connection is not in `from` or
    /// `to` would move backwards.
    pub(crate) fn advance(&self, from: ConnectionState, to: ConnectionState) -> bool {
        if to <= from {
            return false;
        }
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Enter `Closing` from any earlier state and cancel the connection's
    /// tasks. Returns `true` only for the caller that performed the
    /// transition; concurrent and repeated calls get `false`.
    pub(crate) fn begin_close(&self, reason: CloseReason) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current >= ConnectionState::Closing as u8 {
                return false;
            }
            match self.state.compare_exchange(
                current,
                ConnectionState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        let _ = self.close_reason.set(reason);
        self.cancel.cancel();
        true
    }

    pub(crate) fn finish_close(&self) {
        self.state
            .store(ConnectionState::Closed as u8, Ordering::Release);
        self.cancel.cancel();
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason.get().copied()
    }

    pub fn is_closing(&self) -> bool {
        self.state() >= ConnectionState::Closing
    }

    /// Token cancelled when the connection starts closing.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Queue an encoded frame for delivery without waiting.
    pub fn send(&self, frame: Bytes) -> Result<(), SendError> {
        if self.is_closing() {
            return Err(SendError::Closed);
        }
        self.tx.try_send(frame).map_err(|e| {
            self.dropped_frames.fetch_add(1, Ordering::Relaxed);
            match e {
                mpsc::error::TrySendError::Full(_) => SendError::Full,
                mpsc::error::TrySendError::Closed(_) => SendError::Closed,
            }
        })
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Relaxed);
    }

    /// Check and reset the alive flag. Returns `true` if there was traffic
    /// since the previous check.
    pub fn check_alive(&self) -> bool {
        self.alive.swap(false, Ordering::Relaxed)
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("conn_id", &self.conn_id)
            .field("identity", &self.identity.get())
            .field("state", &self.state())
            .finish()
    }
}
