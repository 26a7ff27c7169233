use std::{cmp::Reverse, fmt, future::Future, sync::Arc, time::Duration};

use shared::models::{
    Message, MessagesReadEvent, SendMessageRequest, ServerEvent, ThreadId, ThreadIdError,
    UnreadSenderCount,
};
use thiserror::Error;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{
    message_store::{MessageStore, NewMessage, StoreError},
    realtime::ConnectionRegistry,
};

/// The two ways a messaging operation fails.
#[derive(Debug, Error)]
pub enum MessagingError {
    /// The request is malformed or not allowed; nothing was stored.
    #[error("validation error: {0}")]
    Validation(String),
    /// The store failed or timed out.
    #[error("store error: {0}")]
    Store(String),
}

impl From<StoreError> for MessagingError {
    fn from(err: StoreError) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<ThreadIdError> for MessagingError {
    fn from(err: ThreadIdError) -> Self {
        Self::Validation(err.to_string())
    }
}

/// Result of a messaging operation.
pub type MessagingResult<T> = Result<T, MessagingError>;

/// Result of opening a thread: the full history after read-marking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadFetch {
    /// The whole thread, oldest first.
    pub messages: Vec<Message>,
    /// How many messages this fetch moved from unread to read.
    pub marked_read: u64,
}

/// Send, read-marking and unread accounting over a [`MessageStore`], with live
/// fan-out through the [`ConnectionRegistry`].
#[derive(Clone)]
pub struct MessagingService {
    store: Arc<dyn MessageStore>,
    registry: Arc<ConnectionRegistry>,
    timeout: Duration,
}

impl fmt::Debug for MessagingService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessagingService")
            .field("backend", &self.store.backend())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl MessagingService {
    /// Every store call is bounded by `timeout`.
    #[must_use]
    pub fn new(
        store: Arc<dyn MessageStore>,
        registry: Arc<ConnectionRegistry>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            timeout,
        }
    }

    /// Registry used for live delivery.
    #[must_use]
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Backing store.
    #[must_use]
    pub fn store(&self) -> Arc<dyn MessageStore> {
        Arc::clone(&self.store)
    }

    /// Stores a message from `sender` and pushes it to both participants'
    /// live connections.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::Validation`] for a missing receiver, blank content
    /// or a pair without a valid thread key, and [`MessagingError::Store`] when the
    /// store fails or times out.
    #[instrument(name = "messaging.send", skip(self, request), err)]
    pub async fn send(&self, sender: Uuid, request: SendMessageRequest) -> MessagingResult<Message> {
        let receiver = request
            .receiver_id
            .ok_or_else(|| MessagingError::Validation("receiverId is required".into()))?;
        let content = request.content.unwrap_or_default();
        if content.trim().is_empty() {
            return Err(MessagingError::Validation(
                "content must not be empty".into(),
            ));
        }
        let thread_id = Self::thread_between(sender, receiver)?;

        let message = self
            .bounded(self.store.append(NewMessage {
                sender_id: sender,
                receiver_id: receiver,
                thread_id,
                content,
            }))
            .await?;
        metrics::counter!("sportsin_messages_sent_total").increment(1);

        let delivered = self
            .registry
            .publish_to_thread(&message.thread_id, &ServerEvent::ReceiveMessage(message.clone()))
            .await;
        debug!(message_id = %message.id, delivered, "message stored");

        Ok(message)
    }

    /// Marks everything `other` sent to `user` as read, then returns the whole
    /// thread. Nothing is returned if the mark step fails.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::Store`] when either store step fails or times out.
    #[instrument(name = "messaging.fetch_and_mark_read", skip(self), err)]
    pub async fn fetch_and_mark_read(&self, user: Uuid, other: Uuid) -> MessagingResult<ThreadFetch> {
        let thread_id = Self::thread_between(user, other)?;

        let marked_read = self
            .bounded(self.store.mark_thread_read(&thread_id, user))
            .await?;
        let messages = self.bounded(self.store.list_thread(&thread_id)).await?;

        if marked_read > 0 {
            metrics::counter!("sportsin_messages_marked_read_total").increment(marked_read);
            let receipt = ServerEvent::MessagesRead(MessagesReadEvent {
                thread_id,
                reader_id: user,
                count: marked_read,
            });
            self.registry.publish(other, &receipt).await;
        }

        Ok(ThreadFetch {
            messages,
            marked_read,
        })
    }

    /// Unread messages addressed to `user`.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::Store`] when the store fails or times out.
    #[instrument(name = "messaging.total_unread", skip(self), err)]
    pub async fn total_unread(&self, user: Uuid) -> MessagingResult<i64> {
        self.bounded(self.store.count_unread(user)).await
    }

    /// Unread counts per sender, largest first; ties ordered by sender id.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::Store`] when the store fails or times out.
    #[instrument(name = "messaging.unread_by_sender", skip(self), err)]
    pub async fn unread_by_sender(&self, user: Uuid) -> MessagingResult<Vec<UnreadSenderCount>> {
        let mut counts = self.bounded(self.store.unread_by_sender(user)).await?;
        counts.sort_by_key(|entry| (Reverse(entry.count), entry.sender_id));
        Ok(counts)
    }

    /// Readiness of the underlying store.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::Store`] when the store is unreachable.
    pub async fn ping(&self) -> MessagingResult<()> {
        self.bounded(self.store.ping()).await
    }

    fn thread_between(a: Uuid, b: Uuid) -> MessagingResult<ThreadId> {
        if a == b {
            return Err(MessagingError::Validation(
                "a conversation needs two different users".into(),
            ));
        }
        Ok(ThreadId::between(a, b)?)
    }

    async fn bounded<T, F>(&self, operation: F) -> MessagingResult<T>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.timeout, operation).await {
            Ok(result) => result.map_err(MessagingError::from),
            Err(_) => Err(StoreError::Timeout(self.timeout).into()),
        }
    }
}
