//! Durable storage for accounts and relayed messages.
//!
//! The relay core only sees the [`MessageStore`] and [`UserStore`] traits;
//! the SQLite implementations here are the default backends.

pub mod messages;
pub mod users;

use std::time::{SystemTime, UNIX_EPOCH};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

pub use {
    messages::{Ack, MessageStore, SqliteMessageStore, StoredMessage},
    users::{NewUser, SqliteUserStore, User, UserStore},
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} already exists")]
    Conflict(&'static str),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Open a connection pool for `url` (e.g. `sqlite://meshrelay.db?mode=rwc`).
pub async fn connect(url: &str) -> Result<SqlitePool, StoreError> {
    let options: SqliteConnectOptions = url.parse()?;
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Create every table the relay needs.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), StoreError> {
    SqliteUserStore::init(pool).await?;
    SqliteMessageStore::init(pool).await?;
    tracing::debug!("database schema ready");
    Ok(())
}

/// Cheap liveness probe used by the health endpoint.
pub async fn ping(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
pub(crate) async fn memory_pool() -> SqlitePool {
    // A single connection keeps every query on the same in-memory database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    init_schema(&pool).await.unwrap();
    pool
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn init_is_idempotent_and_pingable() {
        let pool = memory_pool().await;
        init_schema(&pool).await.unwrap();
        ping(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn ping_fails_on_closed_pool() {
        let pool = memory_pool().await;
        pool.close().await;
        assert!(ping(&pool).await.is_err());
    }
}
