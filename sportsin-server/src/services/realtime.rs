//! Live delivery of messaging events to connected participants.
//!
//! [`ConnectionRegistry`] maps each user to the outbound channels of their open
//! WebSocket connections. Delivery is best effort: a full or closed channel
//! drops the event, and closed channels are pruned on the next publish.
//!
//! [`RealtimeSession`] holds the protocol state of one connection.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use shared::models::{
    ClientEvent, JoinedEvent, RealtimeErrorEvent, ServerEvent, ThreadId, TypingNotice,
    TypingSignal,
};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::messaging::{MessagingError, MessagingService};

/// Process-unique id of one registered connection. Never reused.
pub type ConnectionId = u64;

type UserConnections = HashMap<ConnectionId, mpsc::Sender<ServerEvent>>;

/// Live connections per user, each with its own bounded outbound channel.
pub struct ConnectionRegistry {
    capacity: usize,
    next_id: AtomicU64,
    inner: RwLock<HashMap<Uuid, UserConnections>>,
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl ConnectionRegistry {
    /// Registry whose per-connection channels hold `capacity` events (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            next_id: AtomicU64::new(1),
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// A bounded outbound channel sized for one connection.
    #[must_use]
    pub fn channel(&self) -> (mpsc::Sender<ServerEvent>, mpsc::Receiver<ServerEvent>) {
        mpsc::channel(self.capacity)
    }

    /// Binds `sender` to `user_id` until [`ConnectionRegistry::deregister`].
    pub async fn register(&self, user_id: Uuid, sender: mpsc::Sender<ServerEvent>) -> ConnectionId {
        let connection_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let total = {
            let mut guard = self.inner.write().await;
            guard
                .entry(user_id)
                .or_default()
                .insert(connection_id, sender);
            count_connections(&guard)
        };
        record_connections(total);
        info!(%user_id, connection_id, "realtime connection registered");
        connection_id
    }

    /// Returns whether the connection was still registered.
    pub async fn deregister(&self, user_id: Uuid, connection_id: ConnectionId) -> bool {
        let (removed, total) = {
            let mut guard = self.inner.write().await;
            let removed = match guard.get_mut(&user_id) {
                Some(connections) => {
                    let removed = connections.remove(&connection_id).is_some();
                    if connections.is_empty() {
                        guard.remove(&user_id);
                    }
                    removed
                }
                None => false,
            };
            (removed, count_connections(&guard))
        };
        record_connections(total);
        if removed {
            info!(%user_id, connection_id, "realtime connection closed");
        }
        removed
    }

    /// Queues `event` on every connection of `user_id` without waiting and
    /// returns how many connections accepted it.
    pub async fn publish(&self, user_id: Uuid, event: &ServerEvent) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();
        {
            let guard = self.inner.read().await;
            let Some(connections) = guard.get(&user_id) else {
                return 0;
            };
            for (connection_id, sender) in connections {
                match sender.try_send(event.clone()) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        metrics::counter!("sportsin_realtime_dropped_total", "reason" => "full")
                            .increment(1);
                        debug!(%user_id, connection_id, event = event.name(), "outbound buffer full; event dropped");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        metrics::counter!("sportsin_realtime_dropped_total", "reason" => "closed")
                            .increment(1);
                        closed.push(*connection_id);
                    }
                }
            }
        }

        if !closed.is_empty() {
            self.prune(user_id, &closed).await;
        }

        delivered
    }

    /// Publishes to both participants of the thread and nobody else.
    pub async fn publish_to_thread(&self, thread_id: &ThreadId, event: &ServerEvent) -> usize {
        let Some((first, second)) = thread_id.participant_ids() else {
            warn!(%thread_id, "thread key does not name two users; event not delivered");
            return 0;
        };

        let mut delivered = self.publish(first, event).await;
        if second != first {
            delivered += self.publish(second, event).await;
        }
        delivered
    }

    /// Open connections across all users.
    pub async fn connection_count(&self) -> usize {
        count_connections(&*self.inner.read().await)
    }

    async fn prune(&self, user_id: Uuid, closed: &[ConnectionId]) {
        let total = {
            let mut guard = self.inner.write().await;
            if let Some(connections) = guard.get_mut(&user_id) {
                for connection_id in closed {
                    // Only drop it if it is still the closed sender; ids are never reused.
                    if connections
                        .get(connection_id)
                        .is_some_and(|sender| sender.is_closed())
                    {
                        connections.remove(connection_id);
                    }
                }
                if connections.is_empty() {
                    guard.remove(&user_id);
                }
            }
            count_connections(&guard)
        };
        record_connections(total);
        debug!(%user_id, pruned = closed.len(), "pruned closed realtime connections");
    }
}

fn count_connections(map: &HashMap<Uuid, UserConnections>) -> usize {
    map.values().map(HashMap::len).sum()
}

#[allow(clippy::cast_precision_loss)]
fn record_connections(total: usize) {
    metrics::gauge!("sportsin_realtime_connections").set(total as f64);
}

/// Lifecycle of a single realtime connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Open, but not yet bound to a user.
    Connecting,
    /// Bound to a user and registered for delivery.
    Connected {
        /// The joined user.
        user_id: Uuid,
        /// Registration handle used to deregister on close.
        connection_id: ConnectionId,
    },
    /// Closed. Terminal.
    Disconnected,
}

/// Protocol handling for one WebSocket connection, independent of the socket.
pub struct RealtimeSession {
    caller: Uuid,
    state: SessionState,
    outbound: mpsc::Sender<ServerEvent>,
    registry: Arc<ConnectionRegistry>,
    messaging: MessagingService,
}

impl fmt::Debug for RealtimeSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeSession")
            .field("caller", &self.caller)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl RealtimeSession {
    /// Opens a session for the authenticated `caller`. The receiver yields every
    /// event that must be written to the socket.
    #[must_use]
    pub fn open(caller: Uuid, messaging: MessagingService) -> (Self, mpsc::Receiver<ServerEvent>) {
        let registry = messaging.registry();
        let (outbound, receiver) = registry.channel();
        (
            Self {
                caller,
                state: SessionState::Connecting,
                outbound,
                registry,
                messaging,
            },
            receiver,
        )
    }

    #[cfg(test)]
    fn state(&self) -> SessionState {
        self.state
    }

    /// Handles one text frame.
    pub async fn handle_text(&mut self, text: &str) {
        match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => self.handle(event).await,
            Err(err) => {
                debug!(caller = %self.caller, error = %err, "unparseable realtime frame");
                self.reply_error("invalid_event", format!("unrecognized event: {err}"));
            }
        }
    }

    /// Applies one client event to the session.
    pub async fn handle(&mut self, event: ClientEvent) {
        match (self.state, event) {
            (SessionState::Disconnected, _) => {}
            (SessionState::Connecting, ClientEvent::Join(user_id)) => self.join(user_id).await,
            (SessionState::Connecting, _) => {
                self.reply_error("not_joined", "send 'join' before any other event");
            }
            (SessionState::Connected { user_id: joined, .. }, ClientEvent::Join(user_id)) => {
                if user_id == joined {
                    self.reply(ServerEvent::Joined(JoinedEvent { user_id }));
                } else {
                    self.reply_error("identity_mismatch", "connection is already joined");
                }
            }
            (SessionState::Connected { user_id, .. }, ClientEvent::SendMessage(request)) => {
                if let Err(err) = self.messaging.send(user_id, request).await {
                    let code = match err {
                        MessagingError::Validation(_) => "validation_failed",
                        MessagingError::Store(_) => "store_unavailable",
                    };
                    self.reply_error(code, err.to_string());
                }
            }
            (SessionState::Connected { user_id, .. }, ClientEvent::Typing(signal)) => {
                if let Some(to) = self.check_typing(user_id, signal) {
                    self.registry
                        .publish(to, &ServerEvent::Typing(TypingNotice { from: user_id }))
                        .await;
                }
            }
            (SessionState::Connected { user_id, .. }, ClientEvent::StopTyping(signal)) => {
                if let Some(to) = self.check_typing(user_id, signal) {
                    self.registry
                        .publish(to, &ServerEvent::StopTyping(TypingNotice { from: user_id }))
                        .await;
                }
            }
        }
    }

    /// Deregisters the connection. Further events are ignored.
    pub async fn close(&mut self) {
        if let SessionState::Connected {
            user_id,
            connection_id,
        } = self.state
        {
            self.registry.deregister(user_id, connection_id).await;
        }
        self.state = SessionState::Disconnected;
    }

    async fn join(&mut self, user_id: Uuid) {
        if user_id != self.caller {
            warn!(caller = %self.caller, requested = %user_id, "join for another identity rejected");
            self.reply_error("identity_mismatch", "join must use the authenticated user id");
            return;
        }

        let connection_id = self.registry.register(user_id, self.outbound.clone()).await;
        self.state = SessionState::Connected {
            user_id,
            connection_id,
        };
        self.reply(ServerEvent::Joined(JoinedEvent { user_id }));
    }

    fn check_typing(&self, user_id: Uuid, signal: TypingSignal) -> Option<Uuid> {
        if signal.from != user_id {
            debug!(%user_id, from = %signal.from, "typing signal for another user dropped");
            return None;
        }
        Some(signal.to)
    }

    fn reply(&self, event: ServerEvent) {
        if self.outbound.try_send(event).is_err() {
            metrics::counter!("sportsin_realtime_dropped_total", "reason" => "full").increment(1);
        }
    }

    fn reply_error(&self, code: &str, message: impl Into<String>) {
        self.reply(ServerEvent::Error(RealtimeErrorEvent::new(code, message)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory_message_store::InMemoryMessageStore;
    use shared::models::SendMessageRequest;
    use std::time::Duration;

    fn messaging(capacity: usize) -> MessagingService {
        MessagingService::new(
            Arc::new(InMemoryMessageStore::new()),
            Arc::new(ConnectionRegistry::new(capacity)),
            Duration::from_secs(1),
        )
    }

    fn typing_notice(from: Uuid) -> ServerEvent {
        ServerEvent::Typing(TypingNotice { from })
    }

    #[tokio::test]
    async fn publish_reaches_every_connection_of_user() {
        let registry = ConnectionRegistry::new(4);
        let user = Uuid::new_v4();
        let (tx1, mut rx1) = registry.channel();
        let (tx2, mut rx2) = registry.channel();
        registry.register(user, tx1).await;
        registry.register(user, tx2).await;

        let event = typing_notice(Uuid::new_v4());
        assert_eq!(registry.publish(user, &event).await, 2);
        assert_eq!(rx1.recv().await, Some(event.clone()));
        assert_eq!(rx2.recv().await, Some(event));
        assert_eq!(registry.connection_count().await, 2);
    }

    #[tokio::test]
    async fn publish_to_thread_is_scoped_to_participants() {
        let registry = ConnectionRegistry::new(4);
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let (tx_a, mut rx_a) = registry.channel();
        let (tx_b, mut rx_b) = registry.channel();
        let (tx_c, mut rx_c) = registry.channel();
        registry.register(a, tx_a).await;
        registry.register(b, tx_b).await;
        registry.register(c, tx_c).await;

        let thread_id = ThreadId::between(a, b).unwrap();
        let event = typing_notice(a);
        assert_eq!(registry.publish_to_thread(&thread_id, &event).await, 2);

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_buffer_drops_instead_of_blocking() {
        let registry = ConnectionRegistry::new(1);
        let user = Uuid::new_v4();
        let (tx, mut rx) = registry.channel();
        registry.register(user, tx).await;

        assert_eq!(registry.publish(user, &typing_notice(user)).await, 1);
        assert_eq!(registry.publish(user, &typing_notice(user)).await, 0);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_connections_are_pruned() {
        let registry = ConnectionRegistry::new(4);
        let user = Uuid::new_v4();
        let (tx, rx) = registry.channel();
        registry.register(user, tx).await;
        drop(rx);

        assert_eq!(registry.publish(user, &typing_notice(user)).await, 0);
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn deregister_removes_only_that_connection() {
        let registry = ConnectionRegistry::new(4);
        let user = Uuid::new_v4();
        let (tx1, _rx1) = registry.channel();
        let (tx2, _rx2) = registry.channel();
        let first = registry.register(user, tx1).await;
        registry.register(user, tx2).await;

        assert!(registry.deregister(user, first).await);
        assert!(!registry.deregister(user, first).await);
        assert_eq!(registry.connection_count().await, 1);
        assert_eq!(registry.publish(user, &typing_notice(user)).await, 1);
    }

    #[tokio::test]
    async fn events_before_join_are_rejected() {
        let caller = Uuid::new_v4();
        let (mut session, mut outbound) = RealtimeSession::open(caller, messaging(8));

        session
            .handle(ClientEvent::Typing(TypingSignal {
                to: Uuid::new_v4(),
                from: caller,
            }))
            .await;

        let Some(ServerEvent::Error(error)) = outbound.recv().await else {
            panic!("expected error event");
        };
        assert_eq!(error.code, "not_joined");
        assert_eq!(session.state(), SessionState::Connecting);
    }

    #[tokio::test]
    async fn join_must_match_authenticated_caller() {
        let caller = Uuid::new_v4();
        let (mut session, mut outbound) = RealtimeSession::open(caller, messaging(8));

        session.handle(ClientEvent::Join(Uuid::new_v4())).await;
        assert!(matches!(
            outbound.recv().await,
            Some(ServerEvent::Error(RealtimeErrorEvent { ref code, .. })) if code == "identity_mismatch"
        ));
        assert_eq!(session.state(), SessionState::Connecting);

        session.handle(ClientEvent::Join(caller)).await;
        assert_eq!(
            outbound.recv().await,
            Some(ServerEvent::Joined(JoinedEvent { user_id: caller }))
        );
        assert!(matches!(session.state(), SessionState::Connected { user_id, .. } if user_id == caller));
    }

    #[tokio::test]
    async fn typing_is_relayed_only_to_addressee() {
        let service = messaging(8);
        let registry = service.registry();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (mut session_a, _out_a) = RealtimeSession::open(a, service.clone());
        let (mut session_b, mut out_b) = RealtimeSession::open(b, service.clone());
        session_a.handle(ClientEvent::Join(a)).await;
        session_b.handle(ClientEvent::Join(b)).await;
        assert!(matches!(out_b.recv().await, Some(ServerEvent::Joined(_))));

        session_a
            .handle(ClientEvent::Typing(TypingSignal { to: b, from: a }))
            .await;
        assert_eq!(out_b.recv().await, Some(typing_notice(a)));

        // Spoofed sender is dropped silently.
        session_a
            .handle(ClientEvent::StopTyping(TypingSignal {
                to: b,
                from: Uuid::new_v4(),
            }))
            .await;
        assert!(out_b.try_recv().is_err());

        session_a
            .handle(ClientEvent::StopTyping(TypingSignal { to: b, from: a }))
            .await;
        assert_eq!(
            out_b.recv().await,
            Some(ServerEvent::StopTyping(TypingNotice { from: a }))
        );
        assert_eq!(registry.connection_count().await, 2);
    }

    #[tokio::test]
    async fn send_message_persists_and_delivers_to_both_participants() {
        let service = messaging(8);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (mut session_a, mut out_a) = RealtimeSession::open(a, service.clone());
        let (mut session_b, mut out_b) = RealtimeSession::open(b, service.clone());
        session_a.handle(ClientEvent::Join(a)).await;
        session_b.handle(ClientEvent::Join(b)).await;
        out_a.recv().await;
        out_b.recv().await;

        session_a
            .handle(ClientEvent::SendMessage(SendMessageRequest {
                receiver_id: Some(b),
                content: Some("see you at practice".to_string()),
            }))
            .await;

        let Some(ServerEvent::ReceiveMessage(delivered)) = out_b.recv().await else {
            panic!("expected receive_message");
        };
        assert_eq!(delivered.sender_id, a);
        assert!(matches!(out_a.recv().await, Some(ServerEvent::ReceiveMessage(_))));
        assert_eq!(service.total_unread(b).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn invalid_send_reports_validation_error() {
        let service = messaging(8);
        let a = Uuid::new_v4();
        let (mut session, mut outbound) = RealtimeSession::open(a, service);
        session.handle(ClientEvent::Join(a)).await;
        outbound.recv().await;

        session
            .handle(ClientEvent::SendMessage(SendMessageRequest {
                receiver_id: Some(Uuid::new_v4()),
                content: Some("   ".to_string()),
            }))
            .await;

        assert!(matches!(
            outbound.recv().await,
            Some(ServerEvent::Error(RealtimeErrorEvent { ref code, .. })) if code == "validation_failed"
        ));
    }

    #[tokio::test]
    async fn malformed_frame_yields_error_event() {
        let (mut session, mut outbound) = RealtimeSession::open(Uuid::new_v4(), messaging(8));
        session.handle_text("{\"event\":\"nope\"}").await;

        assert!(matches!(
            outbound.recv().await,
            Some(ServerEvent::Error(RealtimeErrorEvent { ref code, .. })) if code == "invalid_event"
        ));
    }

    #[tokio::test]
    async fn close_deregisters_and_ignores_later_events() {
        let service = messaging(8);
        let registry = service.registry();
        let user = Uuid::new_v4();
        let (mut session, mut outbound) = RealtimeSession::open(user, service);
        session.handle(ClientEvent::Join(user)).await;
        outbound.recv().await;
        assert_eq!(registry.connection_count().await, 1);

        session.close().await;
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(registry.connection_count().await, 0);

        session.handle(ClientEvent::Join(user)).await;
        assert!(outbound.try_recv().is_err());
    }
}
