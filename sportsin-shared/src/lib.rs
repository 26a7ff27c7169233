//! Types shared by the messaging server and its clients: wire models,
//! the thread key and the server configuration.
#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
/// Wire models of the messaging API.
pub mod models;
