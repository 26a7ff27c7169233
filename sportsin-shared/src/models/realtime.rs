//! Wire format of the live messaging channel.
//!
//! Every frame is a JSON envelope `{"event": <name>, "data": <payload>}`.

use serde::{Deserialize, Deserializer, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{Message, SendMessageRequest, thread::ThreadId};

/// Typing indicator as sent by a client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct TypingSignal {
    /// The user who should see the indicator.
    pub to: Uuid,
    /// The user who is typing.
    pub from: Uuid,
}

/// Typing indicator as delivered to the addressed user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct TypingNotice {
    /// The user who is typing.
    pub from: Uuid,
}

/// Read receipt pushed to the other participant after a fetch marks messages read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MessagesReadEvent {
    /// Conversation the messages belong to.
    pub thread_id: ThreadId,
    /// Participant who read them.
    pub reader_id: Uuid,
    /// Number of messages that moved from unread to read.
    pub count: u64,
}

/// Acknowledges a successful `join`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JoinedEvent {
    /// Identity the connection is now registered under.
    pub user_id: Uuid,
}

/// Protocol error on a single connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct RealtimeErrorEvent {
    /// Machine readable reason.
    pub code: String,
    /// Human readable description.
    pub message: String,
}

impl RealtimeErrorEvent {
    /// Builds an error event.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Frames a client may send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Register this connection for the given user. The payload is either the
    /// bare user id or `{"userId": ..}`.
    #[serde(rename = "join")]
    Join(#[serde(deserialize_with = "join_payload")] Uuid),
    /// Persist and deliver a message.
    #[serde(rename = "send_message")]
    SendMessage(SendMessageRequest),
    /// The sender started typing.
    #[serde(rename = "typing")]
    Typing(TypingSignal),
    /// The sender stopped typing.
    #[serde(rename = "stopTyping")]
    StopTyping(TypingSignal),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JoinPayload {
    Bare(Uuid),
    Object {
        #[serde(rename = "userId")]
        user_id: Uuid,
    },
}

fn join_payload<'de, D>(deserializer: D) -> Result<Uuid, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match JoinPayload::deserialize(deserializer)? {
        JoinPayload::Bare(user_id) | JoinPayload::Object { user_id } => user_id,
    })
}

/// Frames the server pushes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// The connection is bound to a user.
    #[serde(rename = "joined")]
    Joined(JoinedEvent),
    /// A new message in one of the user's threads.
    #[serde(rename = "receive_message")]
    ReceiveMessage(Message),
    /// Someone is typing to the user.
    #[serde(rename = "typing")]
    Typing(TypingNotice),
    /// Someone stopped typing to the user.
    #[serde(rename = "stopTyping")]
    StopTyping(TypingNotice),
    /// The other participant read messages the user sent.
    #[serde(rename = "messages_read")]
    MessagesRead(MessagesReadEvent),
    /// The last client frame was rejected.
    #[serde(rename = "error")]
    Error(RealtimeErrorEvent),
}

impl ServerEvent {
    /// Event name as it appears on the wire.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Joined(_) => "joined",
            Self::ReceiveMessage(_) => "receive_message",
            Self::Typing(_) => "typing",
            Self::StopTyping(_) => "stopTyping",
            Self::MessagesRead(_) => "messages_read",
            Self::Error(_) => "error",
        }
    }
}
