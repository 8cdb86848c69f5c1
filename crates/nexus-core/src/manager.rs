//! Manager contract shared by every long-lived runtime component.
//!
//! A manager is created during wiring (uninitialized), initialized exactly
//! once by the registry, and shut down exactly once in reverse dependency
//! order. After shutdown it is not reusable.

use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};

/// Base trait for all managers owned by the registry
#[async_trait]
pub trait Manager: Send + Sync {
    /// Manager name used for registration, lookups, and logging
    fn name(&self) -> &str;

    /// Initialize the manager
    async fn initialize(&self) -> Result<()>;

    /// Shut down the manager gracefully
    async fn shutdown(&self) -> Result<()>;

    /// Report the manager's current status
    fn status(&self) -> ManagerStatus {
        ManagerStatus::new(self.name(), false, false)
    }
}

/// Status snapshot reported by a manager
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatus {
    pub name: String,
    pub initialized: bool,
    pub healthy: bool,
    /// Component-specific details
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

impl ManagerStatus {
    pub fn new(name: impl Into<String>, initialized: bool, healthy: bool) -> Self {
        Self {
            name: name.into(),
            initialized,
            healthy,
            details: serde_json::Value::Null,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Lifecycle flag holder shared by manager implementations.
///
/// Replaces inheritance from the usual base-manager class with a small
/// composed state struct; flags are atomics so `status()` never locks.
#[derive(Debug)]
pub struct ManagerState {
    name: String,
    initialized: AtomicBool,
    healthy: AtomicBool,
}

impl ManagerState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            initialized: AtomicBool::new(false),
            healthy: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    /// Mark the manager as initialized and healthy
    pub fn set_ready(&self) {
        self.initialized.store(true, Ordering::SeqCst);
        self.healthy.store(true, Ordering::SeqCst);
    }

    /// Mark the manager as shut down
    pub fn set_down(&self) {
        self.initialized.store(false, Ordering::SeqCst);
        self.healthy.store(false, Ordering::SeqCst);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Build a status snapshot from the current flags
    pub fn status(&self) -> ManagerStatus {
        ManagerStatus::new(&self.name, self.initialized(), self.healthy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manager_state_flags() {
        let state = ManagerState::new("test_manager");
        assert!(!state.initialized());
        assert!(!state.healthy());

        state.set_ready();
        assert!(state.initialized());
        assert!(state.healthy());

        state.set_healthy(false);
        assert!(state.initialized());
        assert!(!state.healthy());

        state.set_down();
        assert!(!state.initialized());
    }

    #[test]
    fn test_status_serialization() {
        let status = ManagerStatus::new("config_manager", true, true)
            .with_details(serde_json::json!({"listeners": 3}));
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["name"], "config_manager");
        assert_eq!(json["details"]["listeners"], 3);
    }
}
