//! # Configuration
//!
//! Server configuration: profile defaults layered with a YAML or JSON file,
//! `SPORTSIN_*` environment variables and command line overrides.

/// Configuration types and the layered loader.
pub mod server;

pub use server::{
    AuthConfig, Config, ConfigError, CorsConfig, DatabaseConfig, ENV_PREFIX, LogFormat,
    LoggingConfig, Profile, RealtimeConfig, ServerSettings,
};
