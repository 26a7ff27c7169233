/// Caller identity from the trusted header.
pub mod auth;
/// Per-request id and caller.
pub mod request_context;
