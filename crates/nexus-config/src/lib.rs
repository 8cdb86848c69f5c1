//! # Nexus Config
//!
//! Layered configuration for the Nexus runtime: schema defaults, an
//! optional YAML/JSON file, and environment variable overlays, validated
//! as a whole and exposed through dotted-path access with change
//! notifications.

pub mod schema;
pub mod service;

pub use schema::ConfigSchema;
pub use service::{ConfigListener, ConfigService, ListenerId, DEFAULT_ENV_PREFIX};
