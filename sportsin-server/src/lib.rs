//! `SportsIn` direct messaging server.
//!
//! Durable one-to-one threads with read-on-fetch semantics, derived unread
//! counts and a WebSocket channel for live delivery and typing indicators.
#![cfg_attr(not(test), forbid(unsafe_code))]

/// Shared state handed to every handler.
pub mod app_state;
/// Database bootstrap.
pub mod db;
/// Request handlers.
pub mod handlers;
/// Error responses.
pub mod http;
/// Request id and caller authentication.
pub mod middleware;
/// `OpenAPI` document.
pub mod openapi;
/// Router assembly per area.
pub mod routes;
/// Startup, tracing, metrics and the application router.
pub mod server;
/// Messaging core: stores, service and live delivery.
pub mod services;
/// HTTP request tracing.
pub mod tracer;
