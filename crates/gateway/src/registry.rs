//! Who is online: the identity → connection map.

use std::{
    collections::HashMap,
    sync::Arc,
    time::SystemTime,
};

use {
    meshrelay_protocol::Identity,
    tokio::sync::RwLock,
    tracing::{debug, info},
};

use crate::{
    connection::{CloseReason, ConnectionHandle},
    metrics as m,
};

/// One live binding of an identity to a connection.
#[derive(Debug, Clone)]
pub struct Session {
    pub identity: Identity,
    pub connection: ConnectionHandle,
    pub established_at: SystemTime,
}

/// Concurrent identity → session map. Every operation takes the lock for a
/// single map operation and never awaits while holding it.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Identity, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `identity` to `connection`, returning the connection it replaced.
    /// The caller is responsible for closing the evicted connection.
    pub async fn register(
        &self,
        identity: Identity,
        connection: ConnectionHandle,
    ) -> Option<ConnectionHandle> {
        let session = Session {
            identity: identity.clone(),
            connection,
            established_at: SystemTime::now(),
        };
        let previous = {
            let mut sessions = self.sessions.write().await;
            let previous = sessions.insert(identity.clone(), session);
            metrics::gauge!(m::SESSIONS_ACTIVE).set(sessions.len() as f64);
            previous
        };

        let evicted = previous.map(|s| s.connection);
        if let Some(old) = &evicted {
            metrics::counter!(m::SESSIONS_EVICTED_TOTAL).increment(1);
            info!(identity = %identity, conn_id = old.conn_id(), "session replaced");
        }
        evicted
    }

    /// Remove the binding for `identity` only if it still points at
    /// `connection`. Returns whether anything was removed.
    pub async fn unregister(&self, identity: &Identity, connection: &ConnectionHandle) -> bool {
        let removed = {
            let mut sessions = self.sessions.write().await;
            let current = sessions
                .get(identity)
                .is_some_and(|s| Arc::ptr_eq(&s.connection, connection));
            if current {
                sessions.remove(identity);
                metrics::gauge!(m::SESSIONS_ACTIVE).set(sessions.len() as f64);
            }
            current
        };
        if removed {
            debug!(identity = %identity, conn_id = connection.conn_id(), "session removed");
        }
        removed
    }

    /// Current connection for `identity`. The handle may go stale right after
    /// this returns; sends to a closed connection fail without panicking.
    pub async fn lookup(&self, identity: &str) -> Option<ConnectionHandle> {
        self.sessions
            .read()
            .await
            .get(identity)
            .map(|s| Arc::clone(&s.connection))
    }

    pub async fn session(&self, identity: &str) -> Option<Session> {
        self.sessions.read().await.get(identity).cloned()
    }

    pub async fn size(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Sorted snapshot of online identities.
    pub async fn identities(&self) -> Vec<Identity> {
        let mut ids: Vec<Identity> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Remove every session and start closing its connection. Returns the
    /// number of sessions closed.
    pub async fn close_all(&self, reason: CloseReason) -> usize {
        let drained: Vec<Session> = {
            let mut sessions = self.sessions.write().await;
            let drained = sessions.drain().map(|(_, s)| s).collect();
            metrics::gauge!(m::SESSIONS_ACTIVE).set(0.0);
            drained
        };
        for session in &drained {
            session.connection.begin_close(reason);
        }
        drained.len()
    }
}
