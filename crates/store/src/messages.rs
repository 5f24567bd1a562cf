use {
    async_trait::async_trait,
    meshrelay_protocol::Envelope,
    sqlx::SqlitePool,
};

use crate::{StoreError, now_ms};

/// Result of an append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    Stored,
    /// A record with the same id already existed; nothing was written.
    Duplicate,
}

/// Append-only message log.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist `envelope`. Repeated appends of the same `id` must not create
    /// a second record.
    async fn append(&self, envelope: &Envelope) -> Result<Ack, StoreError>;
}

/// A persisted message as read back from storage.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct StoredMessage {
    pub id: String,
    pub kind: String,
    pub sender: String,
    pub recipient: String,
    pub payload: Vec<u8>,
    pub sent_at: i64,
    pub stored_at: i64,
}

// ── SQLite-backed message store ─────────────────────────────────────

pub struct SqliteMessageStore {
    pool: SqlitePool,
}

impl SqliteMessageStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the `messages` table if it doesn't exist.
    pub async fn init(pool: &SqlitePool) -> Result<(), StoreError> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS messages (
                id         TEXT PRIMARY KEY,
                kind       TEXT NOT NULL,
                sender     TEXT NOT NULL,
                recipient  TEXT NOT NULL,
                payload    BLOB NOT NULL,
                sent_at    INTEGER NOT NULL,
                stored_at  INTEGER NOT NULL
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_recipient ON messages(recipient, stored_at)",
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<StoredMessage>, StoreError> {
        let row = sqlx::query_as::<_, StoredMessage>("SELECT * FROM messages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn append(&self, envelope: &Envelope) -> Result<Ack, StoreError> {
        let result = sqlx::query(
            r#"INSERT INTO messages (id, kind, sender, recipient, payload, sent_at, stored_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO NOTHING"#,
        )
        .bind(&envelope.id)
        .bind(envelope.kind.as_str())
        .bind(&envelope.sender)
        .bind(&envelope.recipient)
        .bind(&envelope.payload)
        .bind(envelope.timestamp)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::debug!(id = %envelope.id, "duplicate message id, not stored again");
            Ok(Ack::Duplicate)
        } else {
            Ok(Ack::Stored)
        }
    }
}
