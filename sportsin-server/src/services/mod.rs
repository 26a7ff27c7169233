/// In-memory [`MessageStore`].
pub mod memory_message_store;
/// The storage seam.
pub mod message_store;
/// Send, fetch-and-mark-read and unread counts.
pub mod messaging;
/// `PostgreSQL` [`MessageStore`].
pub mod pg_message_store;
pub mod realtime;

pub use memory_message_store::InMemoryMessageStore;
pub use message_store::{MessageStore, NewMessage, StoreError};
pub use messaging::{MessagingError, MessagingService, ThreadFetch};
pub use pg_message_store::PgMessageStore;
pub use realtime::{ConnectionRegistry, RealtimeSession, SessionState};
