//! SQLite message store.

use async_trait::async_trait;
use sea_query::{OnConflict, Order, Query, SqliteQueryBuilder};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::message::Message;
use crate::storage::schema::{Messages, CREATE_MESSAGES_TABLE};
use crate::storage::{decode_timestamp, encode_timestamp, MessageStore, Result, StorageError};

/// SQLite implementation of MessageStore.
pub struct SqliteMessageStore {
    pool: SqlitePool,
}

impl SqliteMessageStore {
    /// Create a store over an existing pool. Call [`init`](Self::init) before use.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open `url` and create the schema.
    ///
    /// In-memory databases live and die with their connection, so the pool
    /// keeps exactly one connection open for `sqlite::memory:`.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = options.connect(url).await?;

        let store = Self::new(pool);
        store.init().await?;
        info!(url = %url, "SQLite message store ready");
        Ok(store)
    }

    /// Create the messages table if it does not exist.
    pub async fn init(&self) -> Result<()> {
        sqlx::raw_sql(CREATE_MESSAGES_TABLE)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn save(&self, message: &Message) -> Result<()> {
        let query = Query::insert()
            .into_table(Messages::Table)
            .columns([
                Messages::Id,
                Messages::UserId,
                Messages::Content,
                Messages::CreatedAt,
            ])
            .values([
                message.id.as_str().into(),
                message.user_id.as_str().into(),
                message.content.as_str().into(),
                encode_timestamp(&message.created_at).into(),
            ])
            .map_err(|e| StorageError::Query(e.to_string()))?
            .on_conflict(OnConflict::column(Messages::Id).do_nothing().to_owned())
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<Message>> {
        let query = Query::select()
            .columns([
                Messages::Id,
                Messages::UserId,
                Messages::Content,
                Messages::CreatedAt,
            ])
            .from(Messages::Table)
            .order_by(Messages::CreatedAt, Order::Asc)
            .order_by(Messages::Id, Order::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;

        rows.into_iter()
            .map(|row| {
                let id: String = row.get("id");
                let created_at: String = row.get("created_at");
                Ok(Message {
                    created_at: decode_timestamp(&id, &created_at)?,
                    user_id: row.get("user_id"),
                    content: row.get("content"),
                    id,
                })
            })
            .collect()
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("SQLite message store closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use sea_query::Expr;

    async fn store() -> SqliteMessageStore {
        SqliteMessageStore::connect("sqlite::memory:").await.unwrap()
    }

    fn message(id: &str, secs: u32) -> Message {
        Message {
            id: id.to_string(),
            user_id: "user-1".to_string(),
            content: format!("content {id}"),
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, secs).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_save_is_idempotent_by_id() {
        let store = store().await;
        let original = message("m1", 0);
        store.save(&original).await.unwrap();

        let mut duplicate = original.clone();
        duplicate.content = "rewritten".to_string();
        store.save(&duplicate).await.unwrap();

        assert_eq!(store.list_all().await.unwrap(), vec![original]);
    }

    #[tokio::test]
    async fn test_list_all_orders_by_created_at_then_id() {
        let store = store().await;
        store.save(&message("b", 5)).await.unwrap();
        store.save(&message("c", 1)).await.unwrap();
        store.save(&message("a", 5)).await.unwrap();

        let ids: Vec<String> = store
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();

        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_close_rejects_later_calls() {
        let store = store().await;
        store.close().await;

        assert!(store.list_all().await.is_err());
    }

    #[tokio::test]
    async fn test_content_with_quotes_round_trips() {
        let store = store().await;
        let mut tricky = message("q", 0);
        tricky.content = "it's \"quoted\"; DROP TABLE messages; --".to_string();
        store.save(&tricky).await.unwrap();

        let count_query = Query::select()
            .expr(Expr::col(Messages::Id).count())
            .from(Messages::Table)
            .to_string(SqliteQueryBuilder);
        let count: i64 = sqlx::query(&count_query)
            .fetch_one(&store.pool)
            .await
            .unwrap()
            .get(0);

        assert_eq!(count, 1);
        assert_eq!(store.list_all().await.unwrap(), vec![tricky]);
    }
}
