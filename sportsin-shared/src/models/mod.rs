/// Stored messages and the REST request and response bodies.
pub mod message;
pub mod realtime;
pub mod thread;
/// RFC 3339 timestamp wrapper.
pub mod timestamp;

pub use message::{Message, SendMessageRequest, UnreadCountResponse, UnreadSenderCount};
pub use realtime::{
    ClientEvent, JoinedEvent, MessagesReadEvent, RealtimeErrorEvent, ServerEvent, TypingNotice,
    TypingSignal,
};
pub use thread::{THREAD_ID_SEPARATOR, ThreadId, ThreadIdError};
pub use timestamp::Timestamp;
