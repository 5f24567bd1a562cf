use {
    async_trait::async_trait,
    serde::Serialize,
    sqlx::SqlitePool,
};

use crate::{StoreError, now_ms};

/// Registration payload.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    /// Base64 X25519 key peers use to derive a shared secret.
    pub public_key: String,
    /// Base64 Ed25519 key used to sign token requests.
    pub signing_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub username: String,
    pub public_key: String,
    #[serde(skip)]
    pub signing_key: String,
    pub created_at: i64,
}

/// Account lookup used by registration and token issuance.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create_user(&self, new_user: NewUser) -> Result<User, StoreError>;
    async fn public_key(&self, user_id: &str) -> Result<Option<String>, StoreError>;
    async fn signing_key(&self, user_id: &str) -> Result<Option<String>, StoreError>;
}

// ── SQLite-backed user store ────────────────────────────────────────

pub struct SqliteUserStore {
    pool: SqlitePool,
}

impl SqliteUserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the `users` table if it doesn't exist.
    pub async fn init(pool: &SqlitePool) -> Result<(), StoreError> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS users (
                id          TEXT PRIMARY KEY,
                username    TEXT NOT NULL UNIQUE,
                public_key  TEXT NOT NULL,
                signing_key TEXT NOT NULL,
                created_at  INTEGER NOT NULL
            )"#,
        )
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn column(&self, sql: &str, user_id: &str) -> Result<Option<String>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as(sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(v,)| v))
    }
}

#[async_trait]
impl UserStore for SqliteUserStore {
    async fn create_user(&self, new_user: NewUser) -> Result<User, StoreError> {
        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            username: new_user.username,
            public_key: new_user.public_key,
            signing_key: new_user.signing_key,
            created_at: now_ms(),
        };
        let result = sqlx::query(
            r#"INSERT INTO users (id, username, public_key, signing_key, created_at)
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.public_key)
        .bind(&user.signing_key)
        .bind(user.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(user),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::Conflict("username"))
            },
            Err(e) => Err(e.into()),
        }
    }

    async fn public_key(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        self.column("SELECT public_key FROM users WHERE id = ?", user_id)
            .await
    }

    async fn signing_key(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        self.column("SELECT signing_key FROM users WHERE id = ?", user_id)
            .await
    }
}
