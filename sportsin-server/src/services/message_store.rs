use std::time::Duration;

use async_trait::async_trait;
use shared::models::{Message, ThreadId, Timestamp, UnreadSenderCount};
use thiserror::Error;
use uuid::Uuid;

/// Failures of a [`MessageStore`] backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database rejected or failed the statement.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// The operation did not finish within the configured bound.
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),
    /// A stored row does not map back to a [`Message`].
    #[error("corrupt message record: {0}")]
    Corrupt(String),
}

/// Result of a store operation.
pub type StoreResult<T> = Result<T, StoreError>;

/// A validated message that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    /// Author.
    pub sender_id: Uuid,
    /// Addressee.
    pub receiver_id: Uuid,
    /// Key resolved from the two participants.
    pub thread_id: ThreadId,
    /// Message text as sent.
    pub content: String,
}

impl NewMessage {
    /// Assigns the identity and creation time of the stored record.
    #[must_use]
    pub fn into_message(self) -> Message {
        Message {
            id: Uuid::new_v4(),
            sender_id: self.sender_id,
            receiver_id: self.receiver_id,
            thread_id: self.thread_id,
            content: self.content,
            is_read: false,
            created_at: Timestamp::now(),
        }
    }
}

/// Durable log of direct messages, addressed by thread key.
#[async_trait]
pub trait MessageStore: Send + Sync + 'static {
    /// Short backend label used in logs and health output.
    fn backend(&self) -> &'static str;

    /// Persists the message as unread and returns the stored record.
    async fn append(&self, message: NewMessage) -> StoreResult<Message>;

    /// Every message of the thread, oldest first. Equal timestamps keep
    /// insertion order.
    async fn list_thread(&self, thread_id: &ThreadId) -> StoreResult<Vec<Message>>;

    /// Flips every unread message addressed to `recipient` in the thread to
    /// read in one atomic step and returns how many changed.
    async fn mark_thread_read(&self, thread_id: &ThreadId, recipient: Uuid) -> StoreResult<u64>;

    /// Unread messages addressed to `recipient` across all threads.
    async fn count_unread(&self, recipient: Uuid) -> StoreResult<i64>;

    /// Unread messages addressed to `recipient`, grouped by sender. Order is
    /// unspecified.
    async fn unread_by_sender(&self, recipient: Uuid) -> StoreResult<Vec<UnreadSenderCount>>;

    /// Cheap round trip proving the backend can serve queries.
    async fn ping(&self) -> StoreResult<()>;
}
