//! Message storage.
//!
//! The pipeline needs two operations from storage: an idempotent save keyed
//! by message id, and an oldest-first listing of everything saved. Backends:
//! - SQLite: `--features sqlite` (default)
//! - PostgreSQL: `--features postgres`
//! - Mock: in-memory, for tests

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::{StorageConfig, StorageType};
use crate::message::Message;

pub mod mock;
#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub mod schema;

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use mock::MockMessageStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresMessageStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteMessageStore;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[cfg(any(feature = "sqlite", feature = "postgres"))]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Query build error: {0}")]
    Query(String),

    #[error("Invalid timestamp in row {id}: {value}")]
    InvalidTimestamp { id: String, value: String },

    #[error("Storage backend not available: {0}")]
    Unavailable(String),
}

/// Durable record of every message accepted by the worker.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist `message`. Saving an id that already exists is a no-op.
    async fn save(&self, message: &Message) -> Result<()>;

    /// Every stored message, ordered by `created_at` then `id`.
    async fn list_all(&self) -> Result<Vec<Message>>;

    /// Release connections. Later calls fail.
    async fn close(&self);
}

/// Connect to the configured backend, creating the schema if needed.
///
/// Connection attempts are retried with [`crate::utils::retry::connection_backoff`];
/// the last error is returned if the database never becomes reachable.
pub async fn init_storage(config: &StorageConfig) -> Result<Arc<dyn MessageStore>> {
    use backon::Retryable;

    let attempt = || async { connect(config).await };

    let store = attempt
        .retry(crate::utils::retry::connection_backoff())
        .when(|e| !matches!(e, StorageError::Unavailable(_)))
        .notify(|err, delay| {
            warn!(error = %err, delay = ?delay, "Storage connection failed, retrying");
        })
        .await?;

    info!(storage_type = ?config.storage_type, "Storage initialized");
    Ok(store)
}

async fn connect(config: &StorageConfig) -> Result<Arc<dyn MessageStore>> {
    match config.storage_type {
        StorageType::Sqlite => {
            #[cfg(feature = "sqlite")]
            {
                let store = SqliteMessageStore::connect(&config.sqlite.url()).await?;
                Ok(Arc::new(store))
            }

            #[cfg(not(feature = "sqlite"))]
            {
                Err(StorageError::Unavailable(
                    "SQLite support requires the 'sqlite' feature".to_string(),
                ))
            }
        }
        StorageType::Postgres => {
            #[cfg(feature = "postgres")]
            {
                let store = PostgresMessageStore::connect(&config.postgres.uri).await?;
                Ok(Arc::new(store))
            }

            #[cfg(not(feature = "postgres"))]
            {
                Err(StorageError::Unavailable(
                    "PostgreSQL support requires the 'postgres' feature".to_string(),
                ))
            }
        }
    }
}

/// Timestamp encoding used by the SQL backends.
///
/// Fixed-width RFC 3339 in UTC, so lexical order equals chronological order.
#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub(crate) fn encode_timestamp(ts: &chrono::DateTime<chrono::Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)
}

#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub(crate) fn decode_timestamp(id: &str, value: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&chrono::Utc))
        .map_err(|_| StorageError::InvalidTimestamp {
            id: id.to_string(),
            value: value.to_string(),
        })
}
