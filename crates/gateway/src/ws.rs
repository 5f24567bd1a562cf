//! Connection lifecycle for one authenticated WebSocket, from registration
//! through teardown.

use std::{sync::Arc, time::Duration};

use {
    axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket},
    bytes::Bytes,
    futures::{
        SinkExt, StreamExt,
        stream::{SplitSink, SplitStream},
    },
    meshrelay_protocol::Identity,
    tokio::{sync::mpsc, time},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, trace, warn},
};

use crate::{
    connection::{CloseReason, ConnectionHandle, ConnectionState},
    heartbeat::{HeartbeatResult, run_heartbeat},
    metrics as m,
    registry::SessionRegistry,
    router::RouteError,
    state::GatewayState,
};

/// Drive an upgraded, authenticated connection until it closes.
///
/// `conn` must already carry its identity; `outbound` is the receiving end of
/// its queue.
pub async fn handle_connection(
    socket: WebSocket,
    state: Arc<GatewayState>,
    conn: ConnectionHandle,
    outbound: mpsc::Receiver<Bytes>,
) {
    let Some(identity) = conn.identity().cloned() else {
        warn!(conn_id = conn.conn_id(), "upgraded connection has no identity");
        conn.finish_close();
        return;
    };
    if !conn.advance(ConnectionState::Authenticating, ConnectionState::Active) {
        debug!(conn_id = conn.conn_id(), state = ?conn.state(), "connection closed before activation");
        conn.finish_close();
        return;
    }

    establish_session(&state.registry, &state.shutdown, &identity, &conn).await;

    let (ws_tx, ws_rx) = socket.split();

    let writer = tokio::spawn(run_writer(
        ws_tx,
        outbound,
        Arc::clone(&conn),
        state.relay.heartbeat_interval(),
    ));
    let idle = tokio::spawn(watch_idle(
        Arc::clone(&conn),
        state.relay.heartbeat_interval(),
        state.relay.idle_timeout(),
    ));

    let reason = read_loop(ws_rx, &state, &conn, &identity).await;
    close_session(&state.registry, &conn, reason).await;

    let _ = idle.await;
    let _ = writer.await;
    conn.finish_close();

    info!(
        identity = %identity,
        conn_id = conn.conn_id(),
        reason = conn.close_reason().unwrap_or(reason).as_str(),
        duration_secs = conn.connected_at().elapsed().as_secs(),
        dropped_frames = conn.dropped_frames(),
        "session closed"
    );
}

/// Register `conn` and close whatever it replaced. A registration that lands
/// after shutdown began has missed the drain, so it closes itself.
pub(crate) async fn establish_session(
    registry: &SessionRegistry,
    shutdown: &CancellationToken,
    identity: &Identity,
    conn: &ConnectionHandle,
) {
    if let Some(evicted) = registry.register(identity.clone(), Arc::clone(conn)).await {
        evicted.begin_close(CloseReason::Evicted);
    }
    info!(identity = %identity, conn_id = conn.conn_id(), "session established");

    if shutdown.is_cancelled() {
        debug!(conn_id = conn.conn_id(), "registered during shutdown");
        close_session(registry, conn, CloseReason::Shutdown).await;
    }
}

/// Begin closing `conn` and remove its registry entry if it still owns one.
///
/// Safe to call any number of times from any task; returns `true` only for
/// the call that started the close.
pub async fn close_session(
    registry: &SessionRegistry,
    conn: &ConnectionHandle,
    reason: CloseReason,
) -> bool {
    let first = conn.begin_close(reason);
    if let Some(identity) = conn.identity() {
        registry.unregister(identity, conn).await;
    }
    first
}

// ── Read side ────────────────────────────────────────────────────────────────

async fn read_loop(
    mut ws_rx: SplitStream<WebSocket>,
    state: &GatewayState,
    conn: &ConnectionHandle,
    identity: &Identity,
) -> CloseReason {
    let cancel = conn.cancel_token().clone();
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return conn.close_reason().unwrap_or(CloseReason::Shutdown);
            }
            next = ws_rx.next() => next,
        };
        let msg = match next {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                debug!(conn_id = conn.conn_id(), error = %e, "websocket read failed");
                return CloseReason::ReadError;
            },
            None => return CloseReason::PeerClosed,
        };

        conn.mark_alive();
        match msg {
            Message::Binary(frame) => handle_frame(state, identity, &frame).await,
            Message::Text(_) => {
                metrics::counter!(m::FRAMES_MALFORMED_TOTAL).increment(1);
                trace!(conn_id = conn.conn_id(), "discarding text frame");
            },
            Message::Close(_) => return CloseReason::PeerClosed,
            Message::Ping(_) | Message::Pong(_) => {},
        }
    }
}

/// Decode and route one inbound frame. Malformed frames are dropped and the
/// connection stays open.
async fn handle_frame(state: &GatewayState, identity: &Identity, frame: &[u8]) {
    let envelope = match meshrelay_protocol::decode_bounded(frame, state.relay.max_frame_bytes) {
        Ok(envelope) => envelope,
        Err(e) => {
            metrics::counter!(m::FRAMES_MALFORMED_TOTAL).increment(1);
            trace!(identity = %identity, len = frame.len(), error = %e, "discarding malformed frame");
            return;
        },
    };

    match state.router.route(envelope, identity).await {
        Ok(_) => {},
        Err(RouteError::EmptyRecipient) => {
            debug!(identity = %identity, "dropped message without recipient");
        },
        Err(e) => warn!(identity = %identity, error = %e, "failed to route message"),
    }
}

// ── Write side ───────────────────────────────────────────────────────────────

/// Drain the outbound queue onto the socket and send periodic pings. Sends
/// a close frame once the connection starts closing.
async fn run_writer(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Bytes>,
    conn: ConnectionHandle,
    ping_every: Duration,
) {
    let cancel = conn.cancel_token().clone();
    let mut ping = time::interval(ping_every);
    ping.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    // Skip the immediate first tick.
    ping.tick().await;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = ws_tx.send(Message::Binary(frame)).await {
                    debug!(conn_id = conn.conn_id(), error = %e, "websocket write failed");
                    conn.begin_close(CloseReason::WriteError);
                    break;
                }
            }
            _ = ping.tick() => {
                if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    conn.begin_close(CloseReason::WriteError);
                    break;
                }
            }
        }
    }

    match conn.close_reason() {
        Some(reason @ (CloseReason::Evicted | CloseReason::IdleTimeout | CloseReason::Shutdown)) => {
            let frame = CloseFrame {
                code: reason.close_code(),
                reason: Utf8Bytes::from_static(reason.as_str()),
            };
            let _ = ws_tx.send(Message::Close(Some(frame))).await;
        },
        _ => {},
    }
    let _ = ws_tx.close().await;
}

// ── Idle detection ───────────────────────────────────────────────────────────

async fn watch_idle(conn: ConnectionHandle, interval: Duration, timeout: Duration) {
    if run_heartbeat(Arc::clone(&conn), interval, timeout).await == HeartbeatResult::TimedOut
        && conn.begin_close(CloseReason::IdleTimeout)
    {
        info!(
            identity = ?conn.identity(),
            conn_id = conn.conn_id(),
            timeout_secs = timeout.as_secs(),
            "closing idle connection"
        );
    }
}
