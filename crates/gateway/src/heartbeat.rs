//! Idle detection for active connections.

use std::time::Duration;

use tokio::time;

use crate::connection::ConnectionHandle;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// No inbound traffic within the idle timeout.
    TimedOut,
    /// The connection started closing for another reason.
    Cancelled,
}

/// Consecutive silent intervals tolerated before timing out.
fn max_missed(interval: Duration, timeout: Duration) -> u32 {
    let interval_ms = interval.as_millis().max(1);
    u32::try_from(timeout.as_millis() / interval_ms)
        .unwrap_or(u32::MAX)
        .max(1)
}

/// Watch `connection` until it goes quiet or is cancelled.
///
/// Every `interval` the alive flag is checked and reset. Inbound frames,
/// including pongs to the writer's pings, set it again. After
/// `timeout / interval` consecutive silent checks the connection is
/// considered dead.
pub async fn run_heartbeat(
    connection: ConnectionHandle,
    interval: Duration,
    timeout: Duration,
) -> HeartbeatResult {
    let cancel = connection.cancel_token().clone();
    let max_missed = max_missed(interval, timeout);
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    let mut missed: u32 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if connection.check_alive() {
                    missed = 0;
                } else {
                    missed += 1;
                    if missed >= max_missed {
                        return HeartbeatResult::TimedOut;
                    }
                }
            }
            () = cancel.cancelled() => return HeartbeatResult::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::connection::{CloseReason, Connection},
    };

    #[test]
    fn max_missed_rounds_down_and_clamps() {
        assert_eq!(max_missed(Duration::from_secs(30), Duration::from_secs(90)), 3);
        assert_eq!(max_missed(Duration::from_millis(100), Duration::from_millis(250)), 2);
        assert_eq!(max_missed(Duration::from_secs(60), Duration::from_secs(10)), 1);
        assert_eq!(max_missed(Duration::ZERO, Duration::from_millis(5)), 5);
    }

    #[tokio::test]
    async fn cancelled_when_connection_closes() {
        let (conn, _rx) = Connection::new(4);
        let watched = conn.clone();
        let handle = tokio::spawn(async move {
            run_heartbeat(watched, Duration::from_secs(100), Duration::from_secs(300)).await
        });
        conn.begin_close(CloseReason::PeerClosed);
        assert_eq!(handle.await.unwrap(), HeartbeatResult::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_connection_times_out() {
        let (conn, _rx) = Connection::new(4);
        // Initial alive flag covers the first tick; three silent ticks follow.
        let result =
            run_heartbeat(conn, Duration::from_millis(100), Duration::from_millis(300)).await;
        assert_eq!(result, HeartbeatResult::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn active_connection_stays_alive() {
        let (conn, _rx) = Connection::new(4);
        let watched = conn.clone();
        let handle = tokio::spawn(async move {
            run_heartbeat(watched, Duration::from_millis(50), Duration::from_millis(100)).await
        });

        for _ in 0..10 {
            time::sleep(Duration::from_millis(20)).await;
            conn.mark_alive();
        }
        assert!(!handle.is_finished());

        conn.begin_close(CloseReason::Shutdown);
        assert_eq!(handle.await.unwrap(), HeartbeatResult::Cancelled);
    }
}
