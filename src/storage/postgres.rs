//! PostgreSQL message store.

use async_trait::async_trait;
use sea_query::{OnConflict, Order, PostgresQueryBuilder, Query};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::info;

use crate::message::Message;
use crate::storage::schema::{Messages, CREATE_MESSAGES_TABLE};
use crate::storage::{decode_timestamp, encode_timestamp, MessageStore, Result, StorageError};

/// PostgreSQL implementation of MessageStore.
pub struct PostgresMessageStore {
    pool: PgPool,
}

impl PostgresMessageStore {
    /// Create a store over an existing pool. Call [`init`](Self::init) before use.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open `uri` and create the schema.
    pub async fn connect(uri: &str) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(10).connect(uri).await?;

        let store = Self::new(pool);
        store.init().await?;
        info!("PostgreSQL message store ready");
        Ok(store)
    }

    pub async fn init(&self) -> Result<()> {
        sqlx::raw_sql(CREATE_MESSAGES_TABLE)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MessageStore for PostgresMessageStore {
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
            .to_string(PostgresQueryBuilder);

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
            .to_string(PostgresQueryBuilder);

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
        info!("PostgreSQL message store closed");
    }
}
