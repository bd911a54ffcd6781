//! Postgres cold store.
//!
//! Holds every message for long-term storage and the users table consulted
//! to enrich senders.

use crate::config::PostgresConfig;
use async_trait::async_trait;
use deadpool_postgres::{
    Config as DeadpoolConfig, ManagerConfig, Pool, PoolConfig, PoolError, RecyclingMethod, Runtime,
};
use ridechat_core::{MessageStore, StoreError, UserProfile};
use ridechat_protocol::ChatMessage;
use tokio_postgres::NoTls;
use tracing::{debug, info};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id VARCHAR(255) PRIMARY KEY,
    email VARCHAR(255) UNIQUE,
    name VARCHAR(255),
    picture TEXT,
    role VARCHAR(50) DEFAULT 'passenger'
);

CREATE TABLE IF NOT EXISTS messages (
    id SERIAL PRIMARY KEY,
    room_id VARCHAR(255) NOT NULL,
    sender_id VARCHAR(255) NOT NULL,
    content TEXT NOT NULL,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS messages_room_created_idx ON messages (room_id, created_at);
";

const INSERT_MESSAGE: &str =
    "INSERT INTO messages (room_id, sender_id, content, created_at) VALUES ($1, $2, $3, $4)";

const SELECT_USER: &str =
    "SELECT id, COALESCE(name, ''), COALESCE(picture, '') FROM users WHERE id = $1";

fn pool_error(e: PoolError) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn query_error(e: tokio_postgres::Error) -> StoreError {
    if e.is_closed() {
        StoreError::Unavailable(e.to_string())
    } else {
        StoreError::Backend(e.to_string())
    }
}

/// Message and user store on a pooled Postgres connection.
#[derive(Clone)]
pub struct PostgresStore {
    pool: Pool,
}

impl PostgresStore {
    /// Create a pool. Connections are opened lazily.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool configuration is invalid.
    pub fn new(config: &PostgresConfig) -> Result<Self, StoreError> {
        let mut pg_config = DeadpoolConfig::new();
        pg_config.url = Some(config.url.clone());
        pg_config.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        pg_config.pool = Some(PoolConfig::new(config.pool_size.max(1)));

        let pool = pg_config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StoreError::Backend(format!("Failed to create database pool: {e}")))?;
        info!(pool_size = config.pool_size, "Database pool created");
        Ok(Self { pool })
    }

    /// Create the tables if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is unreachable or rejects the DDL.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        client.batch_execute(SCHEMA).await.map_err(query_error)?;
        debug!("Schema ensured");
        Ok(())
    }
}

#[async_trait]
impl MessageStore for PostgresStore {
    async fn save_message(&self, message: &ChatMessage) -> Result<(), StoreError> {
        let created_at = message
            .created_at
            .unwrap_or_else(chrono::Utc::now)
            .naive_utc();

        let client = self.pool.get().await.map_err(pool_error)?;
        client
            .execute(
                INSERT_MESSAGE,
                &[
                    &message.room_id,
                    &message.sender_id,
                    &message.content,
                    &created_at,
                ],
            )
            .await
            .map_err(query_error)?;
        Ok(())
    }

    async fn lookup_user(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let row = client
            .query_opt(SELECT_USER, &[&user_id])
            .await
            .map_err(query_error)?;

        Ok(row.map(|row| UserProfile {
            id: row.get(0),
            name: row.get(1),
            picture: row.get(2),
        }))
    }
}
