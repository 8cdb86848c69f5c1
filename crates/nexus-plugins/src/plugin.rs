//! Plugin contract and handle types.
//!
//! Plugins implement an explicit interface instead of being discovered by
//! attribute reflection: `name()`/`version()` accessors plus a JSON-typed
//! `invoke` dispatch, and dynamic libraries export one well-known factory
//! symbol.

use chrono::{DateTime, Utc};
use nexus_core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Symbol every dynamically loaded plugin library must export:
/// `fn() -> Box<dyn Plugin>`
pub const PLUGIN_ENTRY_SYMBOL: &[u8] = b"nexus_plugin_create";

/// The contract plugin implementations fulfill
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Dispatch a named method with JSON arguments
    fn invoke(&self, method: &str, args: serde_json::Value) -> Result<serde_json::Value>;

    /// Optional cleanup hook, called with a bounded timeout on unload
    fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Factory used for built-in (trusted, statically linked) plugins
pub type PluginFactory = Arc<dyn Fn() -> Box<dyn Plugin> + Send + Sync>;

/// Execution boundary for plugin code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationLevel {
    /// Inline execution; trusted/built-in plugins only
    None,
    /// I/O worker pool with timeout enforcement
    Thread,
    /// Isolated worker pool, no shared in-memory state with the caller
    Process,
}

impl IsolationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Thread => "thread",
            Self::Process => "process",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "thread" => Ok(Self::Thread),
            "process" => Ok(Self::Process),
            other => Err(Error::invalid_input(
                "isolation_level",
                format!("unknown isolation level '{other}'"),
            )),
        }
    }
}

/// Cooperative resource budgets for a plugin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub max_memory_mb: u64,
    pub max_cpu_percent: f64,
    pub max_file_handles: u32,
    pub max_network_connections: u32,
    pub max_execution_time_seconds: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_memory_mb: 256,
            max_cpu_percent: 50.0,
            max_file_handles: 100,
            max_network_connections: 20,
            max_execution_time_seconds: 300,
        }
    }
}

/// Snapshot of a loaded plugin
#[derive(Debug, Clone, Serialize)]
pub struct PluginHandle {
    pub plugin_id: String,
    pub name: String,
    pub version: String,
    pub isolation_level: IsolationLevel,
    pub path: Option<String>,
    pub loaded_at: DateTime<Utc>,
    pub healthy: bool,
    pub error: Option<String>,
    pub resource_limits: ResourceLimits,
    pub metadata: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolation_level_parse() {
        assert_eq!(IsolationLevel::parse("thread").unwrap(), IsolationLevel::Thread);
        assert_eq!(IsolationLevel::parse("NONE").unwrap(), IsolationLevel::None);
        assert_eq!(
            IsolationLevel::parse("process").unwrap(),
            IsolationLevel::Process
        );
        assert!(IsolationLevel::parse("container").is_err());
    }

    #[test]
    fn test_default_limits() {
        let limits = ResourceLimits::default();
        assert_eq!(limits.max_memory_mb, 256);
        assert_eq!(limits.max_execution_time_seconds, 300);
    }
}
