//! Per-message routing: stamp the sender, persist durable messages in the
//! background, deliver to whoever is online.

use std::{fmt, sync::Arc};

use {
    bytes::Bytes,
    meshrelay_protocol::{CodecError, Envelope, Identity},
    meshrelay_store::{Ack, MessageStore},
    tokio::task::JoinHandle,
    tracing::{debug, trace, warn},
};

use crate::{metrics as m, registry::SessionRegistry};

/// What happened to one routed message. Guides logs and metrics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Queued on the target's live connection.
    Delivered,
    /// Target offline and the message type is not stored.
    RecipientOffline,
    /// Target offline; the message was handed to the store.
    PersistedOnly,
}

impl DeliveryOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::RecipientOffline => "recipient_offline",
            Self::PersistedOnly => "persisted_only",
        }
    }
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("text message has no recipient")]
    EmptyRecipient,
    #[error("failed to re-encode envelope: {0}")]
    Encode(#[from] CodecError),
}

/// Result of [`MessageRouter::route`].
#[derive(Debug)]
pub struct RouteReport {
    pub outcome: DeliveryOutcome,
    /// Background append, present for durable types. Dropping it does not
    /// cancel the write.
    pub persist: Option<JoinHandle<()>>,
}

pub struct MessageRouter {
    registry: Arc<SessionRegistry>,
    store: Arc<dyn MessageStore>,
    reject_empty_recipient: bool,
}

impl MessageRouter {
    pub fn new(registry: Arc<SessionRegistry>, store: Arc<dyn MessageStore>) -> Self {
        Self {
            registry,
            store,
            reject_empty_recipient: false,
        }
    }

    /// Refuse durable messages without a recipient instead of echoing them.
    pub fn with_reject_empty_recipient(mut self, reject: bool) -> Self {
        self.reject_empty_recipient = reject;
        self
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Route one envelope received from `sender`.
    ///
    /// The sender field is overwritten before anything else looks at the
    /// envelope. Storage runs on its own task and is never awaited here.
    pub async fn route(
        &self,
        mut envelope: Envelope,
        sender: &Identity,
    ) -> Result<RouteReport, RouteError> {
        envelope.stamp_sender(sender);

        let durable = envelope.kind.is_durable();
        if durable && self.reject_empty_recipient && !envelope.has_recipient() {
            debug!(sender = %sender, id = %envelope.id, "rejected message without recipient");
            return Err(RouteError::EmptyRecipient);
        }

        let frame = Bytes::from(meshrelay_protocol::encode(&envelope)?);
        let target = envelope.target().to_owned();
        let id = envelope.id.clone();
        let kind = envelope.kind;

        let persist = durable.then(|| self.spawn_persist(envelope));

        let outcome = match self.registry.lookup(&target).await {
            Some(conn) => match conn.send(frame) {
                Ok(()) => DeliveryOutcome::Delivered,
                Err(e) => {
                    metrics::counter!(m::DELIVERY_FAILURES_TOTAL).increment(1);
                    warn!(
                        id = %id,
                        recipient = %target,
                        conn_id = conn.conn_id(),
                        error = %e,
                        "delivery failed"
                    );
                    offline_outcome(durable)
                },
            },
            None => offline_outcome(durable),
        };

        metrics::counter!(m::MESSAGES_ROUTED_TOTAL, "outcome" => outcome.as_str()).increment(1);
        trace!(id = %id, kind = %kind, sender = %sender, recipient = %target, %outcome, "routed");

        Ok(RouteReport { outcome, persist })
    }

    fn spawn_persist(&self, envelope: Envelope) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            match store.append(&envelope).await {
                Ok(Ack::Stored) => {},
                Ok(Ack::Duplicate) => {
                    debug!(id = %envelope.id, "duplicate message id, not stored again");
                },
                Err(e) => {
                    metrics::counter!(m::STORE_FAILURES_TOTAL).increment(1);
                    warn!(id = %envelope.id, sender = %envelope.sender, error = %e, "failed to persist message");
                },
            }
        })
    }
}

fn offline_outcome(durable: bool) -> DeliveryOutcome {
    if durable {
        DeliveryOutcome::PersistedOnly
    } else {
        DeliveryOutcome::RecipientOffline
    }
}
