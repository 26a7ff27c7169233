use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{Timestamp, thread::ThreadId};

/// A direct message between two users. Only `is_read` ever changes after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique identifier for the message.
    pub id: Uuid,

    /// User who sent the message.
    pub sender_id: Uuid,

    /// User the message is addressed to.
    pub receiver_id: Uuid,

    /// Canonical key of the conversation between sender and receiver.
    pub thread_id: ThreadId,

    /// The message text. Never empty.
    pub content: String,

    /// Whether the receiver has fetched the thread since this message arrived.
    pub is_read: bool,

    /// When the message was stored.
    pub created_at: Timestamp,
}

impl Message {
    /// True when this message still counts towards `user`'s unread total.
    #[must_use]
    pub fn is_unread_for(&self, user: Uuid) -> bool {
        self.receiver_id == user && !self.is_read
    }
}

/// Body of `POST /api/messages` and of the `send_message` realtime event.
///
/// Both fields are optional on the wire so that a missing field is reported as a
/// validation failure rather than a deserialization rejection.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    /// The user the message is for.
    #[serde(default)]
    pub receiver_id: Option<Uuid>,
    /// Message text.
    #[serde(default)]
    pub content: Option<String>,
}

/// Scalar unread badge count.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct UnreadCountResponse {
    /// Messages addressed to the caller that they have not read yet.
    pub count: i64,
}

/// Unread messages from a single sender.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UnreadSenderCount {
    /// The user who sent the unread messages.
    pub sender_id: Uuid,
    /// How many of their messages are unread.
    pub count: i64,
}
