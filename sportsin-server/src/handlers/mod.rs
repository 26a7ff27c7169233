/// REST endpoints.
pub mod messages;
/// WebSocket endpoint.
pub mod realtime;
