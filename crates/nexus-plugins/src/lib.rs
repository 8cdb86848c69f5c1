//! # Nexus Plugins
//!
//! Plugin lifecycle and bounded invocation of third-party code: manifest
//! discovery, native library loading through a well-known factory symbol,
//! isolation levels, per-method serialization, and timeouts.

pub mod isolation;
pub mod loader;
pub mod manager;
pub mod plugin;

pub use isolation::PluginIsolationManager;
pub use loader::{discover, DiscoveredPlugin, PluginInstance, PluginManifest, MANIFEST_FILENAME};
pub use manager::PluginManager;
pub use plugin::{
    IsolationLevel, Plugin, PluginFactory, PluginHandle, ResourceLimits, PLUGIN_ENTRY_SYMBOL,
};
