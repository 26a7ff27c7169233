use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::models::{Message, ThreadId, Timestamp, UnreadSenderCount};
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use super::message_store::{MessageStore, NewMessage, StoreError, StoreResult};

const SELECT_COLUMNS: &str =
    "id, sender_id, receiver_id, thread_id, content, is_read, created_at";

/// `PostgreSQL` backed store over the `direct_messages` table.
#[derive(Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl fmt::Debug for PgMessageStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgMessageStore").finish()
    }
}

impl PgMessageStore {
    /// Store over an existing pool; the schema must already be bootstrapped.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    sender_id: Uuid,
    receiver_id: Uuid,
    thread_id: String,
    content: String,
    is_read: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for Message {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let thread_id = ThreadId::parse(&row.thread_id)
            .map_err(|err| StoreError::Corrupt(format!("message {}: {err}", row.id)))?;
        Ok(Self {
            id: row.id,
            sender_id: row.sender_id,
            receiver_id: row.receiver_id,
            thread_id,
            content: row.content,
            is_read: row.is_read,
            created_at: Timestamp(row.created_at),
        })
    }
}

#[derive(sqlx::FromRow)]
struct SenderCountRow {
    sender_id: Uuid,
    count: i64,
}

#[async_trait]
impl MessageStore for PgMessageStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    #[instrument(name = "store.append", skip(self, message), err)]
    async fn append(&self, message: NewMessage) -> StoreResult<Message> {
        let message = message.into_message();
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "INSERT INTO direct_messages \
             (id, sender_id, receiver_id, thread_id, content, is_read, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {SELECT_COLUMNS}"
        ))
        .bind(message.id)
        .bind(message.sender_id)
        .bind(message.receiver_id)
        .bind(message.thread_id.as_str())
        .bind(&message.content)
        .bind(message.is_read)
        .bind(message.created_at.0)
        .fetch_one(&self.pool)
        .await?;

        Message::try_from(row)
    }

    #[instrument(name = "store.list_thread", skip(self), err)]
    async fn list_thread(&self, thread_id: &ThreadId) -> StoreResult<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM direct_messages \
             WHERE thread_id = $1 \
             ORDER BY created_at ASC, seq ASC"
        ))
        .bind(thread_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Message::try_from).collect()
    }

    #[instrument(name = "store.mark_thread_read", skip(self), err)]
    async fn mark_thread_read(&self, thread_id: &ThreadId, recipient: Uuid) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE direct_messages SET is_read = TRUE \
             WHERE thread_id = $1 AND receiver_id = $2 AND is_read = FALSE",
        )
        .bind(thread_id.as_str())
        .bind(recipient)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    #[instrument(name = "store.count_unread", skip(self), err)]
    async fn count_unread(&self, recipient: Uuid) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM direct_messages WHERE receiver_id = $1 AND is_read = FALSE",
        )
        .bind(recipient)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    #[instrument(name = "store.unread_by_sender", skip(self), err)]
    async fn unread_by_sender(&self, recipient: Uuid) -> StoreResult<Vec<UnreadSenderCount>> {
        let rows = sqlx::query_as::<_, SenderCountRow>(
            "SELECT sender_id, COUNT(*) AS count FROM direct_messages \
             WHERE receiver_id = $1 AND is_read = FALSE \
             GROUP BY sender_id",
        )
        .bind(recipient)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| UnreadSenderCount {
                sender_id: row.sender_id,
                count: row.count,
            })
            .collect())
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1 FROM direct_messages LIMIT 1")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
