use std::{collections::HashMap, fmt};

use async_trait::async_trait;
use shared::models::{Message, ThreadId, UnreadSenderCount};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::message_store::{MessageStore, NewMessage, StoreResult};

/// Process-local store for the dev and test profiles.
#[derive(Default)]
pub struct InMemoryMessageStore {
    messages: RwLock<Vec<Message>>,
}

impl fmt::Debug for InMemoryMessageStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryMessageStore").finish()
    }
}

impl InMemoryMessageStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn append(&self, message: NewMessage) -> StoreResult<Message> {
        let mut guard = self.messages.write().await;
        let message = message.into_message();
        guard.push(message.clone());
        Ok(message)
    }

    async fn list_thread(&self, thread_id: &ThreadId) -> StoreResult<Vec<Message>> {
        let guard = self.messages.read().await;
        let mut thread: Vec<Message> = guard
            .iter()
            .filter(|message| &message.thread_id == thread_id)
            .cloned()
            .collect();
        // Stable, so equal timestamps keep insertion order.
        thread.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(thread)
    }

    async fn mark_thread_read(&self, thread_id: &ThreadId, recipient: Uuid) -> StoreResult<u64> {
        let mut guard = self.messages.write().await;
        let mut marked = 0;
        for message in guard
            .iter_mut()
            .filter(|message| &message.thread_id == thread_id && message.is_unread_for(recipient))
        {
            message.is_read = true;
            marked += 1;
        }
        Ok(marked)
    }

    async fn count_unread(&self, recipient: Uuid) -> StoreResult<i64> {
        let guard = self.messages.read().await;
        let count = guard
            .iter()
            .filter(|message| message.is_unread_for(recipient))
            .count();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }

    async fn unread_by_sender(&self, recipient: Uuid) -> StoreResult<Vec<UnreadSenderCount>> {
        let guard = self.messages.read().await;
        let mut counts: HashMap<Uuid, i64> = HashMap::new();
        for message in guard.iter().filter(|message| message.is_unread_for(recipient)) {
            *counts.entry(message.sender_id).or_default() += 1;
        }
        Ok(counts
            .into_iter()
            .map(|(sender_id, count)| UnreadSenderCount { sender_id, count })
            .collect())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
