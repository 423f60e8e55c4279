use crate::config::DatabaseConfig;
use crate::conversation::{Conversation, ConversationStore, NewConversation};
use crate::error::RelayResult;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

const SCHEMA_SQL: &str = include_str!("schemas/sqlite.sql");

fn build_pagination_query(
    base_query: &str,
    order_by: &str,
    limit: Option<u64>,
    offset: Option<u64>,
    reverse: bool,
) -> String {
    let order_direction = if reverse { "ASC" } else { "DESC" };
    let mut query = format!("{base_query} ORDER BY {order_by} {order_direction}");

    // SQLite only accepts OFFSET after a LIMIT, -1 means unbounded.
    match (limit, offset) {
        (Some(limit_val), _) => query.push_str(&format!(" LIMIT {limit_val}")),
        (None, Some(_)) => query.push_str(" LIMIT -1"),
        (None, None) => {}
    }

    if let Some(offset_val) = offset {
        query.push_str(&format!(" OFFSET {offset_val}"));
    }

    query
}

/// Append-only conversation log backed by SQLite.
pub struct SqliteConversationStore {
    pool: SqlitePool,
}
impl SqliteConversationStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let connection_options = SqliteConnectOptions::from_str(&config.database_url)
            .with_context(|| format!("Invalid database URL: {}", config.database_url))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(None)
            .max_lifetime(None)
            .test_before_acquire(true)
            .connect_with(connection_options)
            .await
            .with_context(|| format!("Failed to open database: {}", config.database_url))?;

        let store = Self { pool };
        store.init_tables().await?;
        Ok(store)
    }

    async fn init_tables(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&self.pool)
            .await
            .context("Failed to initialize conversation tables")?;

        debug!("Conversation tables initialized successfully!");
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn insert_conversation(&self, conversation: NewConversation<'_>) -> RelayResult<i64> {
        // Dropping the transaction on any early return rolls it back and
        // hands the connection back to the pool.
        let mut transaction = self.pool.begin().await?;

        let inserted = sqlx::query_scalar::<_, i64>(
            "INSERT INTO conversations (sender, message, response) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(conversation.sender)
        .bind(conversation.message)
        .bind(conversation.response)
        .fetch_one(&mut *transaction)
        .await;

        match inserted {
            Ok(id) => {
                transaction.commit().await?;
                Ok(id)
            }
            Err(e) => {
                if let Err(rollback_error) = transaction.rollback().await {
                    warn!("Failed to roll back conversation insert: {rollback_error}");
                }
                Err(e.into())
            }
        }
    }

    async fn get_conversations(
        &self,
        sender: &str,
        limit: Option<u64>,
        offset: Option<u64>,
        reverse: bool,
    ) -> RelayResult<Vec<Conversation>> {
        let query = build_pagination_query(
            "SELECT id, sender, message, response, created_at FROM conversations WHERE sender = ?",
            "id",
            limit,
            offset,
            reverse,
        );

        let conversations = sqlx::query_as::<_, Conversation>(&query)
            .bind(sender)
            .fetch_all(&self.pool)
            .await?;

        Ok(conversations)
    }
}
