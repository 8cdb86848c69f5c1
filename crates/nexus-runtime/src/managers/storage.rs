//! Storage manager: the narrow persistence adapter for settings and the
//! audit trail.
//!
//! Backing is config-driven behind the store traits; the memory
//! implementation is the default (database drivers are a deployment
//! concern, not a runtime one). The audit trail is fed from the event bus
//! and from configuration changes, so producers stay decoupled.

use async_trait::async_trait;
use nexus_config::schema::DatabaseSection;
use nexus_config::{ConfigService, ListenerId};
use nexus_core::error::{Error, Result};
use nexus_core::manager::{Manager, ManagerState, ManagerStatus};
use nexus_core::models::{AuditAction, AuditLog, SystemSetting};
use nexus_events::{handler, EventBus};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

const SOURCE: &str = "storage_manager";
/// Cap on the in-memory audit trail
const AUDIT_CAP: usize = 10_000;

/// Key-value system settings persistence
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<SystemSetting>>;
    /// Rejects writes to non-editable settings
    async fn set(&self, setting: SystemSetting) -> Result<()>;
    async fn list(&self) -> Result<Vec<SystemSetting>>;
    async fn delete(&self, key: &str) -> Result<bool>;
}

/// Append-only audit trail persistence
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, entry: AuditLog) -> Result<()>;
    /// Most recent entries, newest first
    async fn recent(&self, limit: usize) -> Result<Vec<AuditLog>>;
}

/// In-memory settings store
#[derive(Default)]
pub struct MemorySettingsStore {
    settings: RwLock<HashMap<String, SystemSetting>>,
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn get(&self, key: &str) -> Result<Option<SystemSetting>> {
        Ok(self.settings.read().get(key).cloned())
    }

    async fn set(&self, setting: SystemSetting) -> Result<()> {
        let mut settings = self.settings.write();
        if let Some(existing) = settings.get(&setting.key) {
            if !existing.is_editable {
                return Err(Error::invalid_input(
                    setting.key.clone(),
                    "setting is not editable",
                ));
            }
        }
        settings.insert(setting.key.clone(), setting);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SystemSetting>> {
        let mut all: Vec<SystemSetting> = self.settings.read().values().cloned().collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(all)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.settings.write().remove(key).is_some())
    }
}

/// In-memory bounded audit store
#[derive(Default)]
pub struct MemoryAuditStore {
    entries: RwLock<VecDeque<AuditLog>>,
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append(&self, entry: AuditLog) -> Result<()> {
        let mut entries = self.entries.write();
        entries.push_back(entry);
        if entries.len() > AUDIT_CAP {
            entries.pop_front();
        }
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AuditLog>> {
        let entries = self.entries.read();
        Ok(entries.iter().rev().take(limit).cloned().collect())
    }
}

fn audit_action_for(event_type: &str) -> Option<(AuditAction, &'static str)> {
    match event_type {
        "security/user_created" => Some((AuditAction::Create, "user")),
        "security/user_updated" => Some((AuditAction::Update, "user")),
        "security/user_deleted" => Some((AuditAction::Delete, "user")),
        "security/user_login" => Some((AuditAction::Login, "user")),
        "security/token_revoked" => Some((AuditAction::Logout, "token")),
        "plugins/loaded" | "plugins/unloaded" => Some((AuditAction::Plugin, "plugin")),
        "system/started" | "system/shutting_down" => Some((AuditAction::System, "system")),
        _ => None,
    }
}

pub struct StorageManager {
    state: ManagerState,
    config: Arc<ConfigService>,
    bus: Arc<EventBus>,
    settings: Arc<dyn SettingsStore>,
    audit: Arc<dyn AuditStore>,
    listener_id: Mutex<Option<ListenerId>>,
}

impl StorageManager {
    pub fn new(config: Arc<ConfigService>, bus: Arc<EventBus>) -> Arc<Self> {
        Arc::new(Self {
            state: ManagerState::new("storage_manager"),
            config,
            bus,
            settings: Arc::new(MemorySettingsStore::default()),
            audit: Arc::new(MemoryAuditStore::default()),
            listener_id: Mutex::new(None),
        })
    }

    pub fn settings(&self) -> &Arc<dyn SettingsStore> {
        &self.settings
    }

    pub fn audit(&self) -> &Arc<dyn AuditStore> {
        &self.audit
    }
}

#[async_trait]
impl Manager for StorageManager {
    fn name(&self) -> &str {
        self.state.name()
    }

    async fn initialize(&self) -> Result<()> {
        let section: DatabaseSection = self.config.section("database")?;
        if section.db_type != "memory" {
            tracing::warn!(
                db_type = %section.db_type,
                "No database driver compiled in; using memory-backed stores"
            );
        }

        // Audit trail from runtime events
        let audit = self.audit.clone();
        self.bus.subscribe(
            "*",
            SOURCE,
            handler(move |event| {
                let audit = audit.clone();
                async move {
                    if let Some((action, resource_type)) = audit_action_for(&event.event_type) {
                        let entry = AuditLog::new(action, resource_type)
                            .with_description(event.event_type.clone())
                            .with_details(event.payload.clone());
                        audit.append(entry).await?;
                    }
                    Ok(())
                }
            }),
        )?;

        // Configuration changes are audited too
        let audit = self.audit.clone();
        let listener_id = self.config.register_listener(
            "",
            Arc::new(move |key: &str, value: &serde_json::Value| {
                let entry = AuditLog::new(AuditAction::Config, "config")
                    .with_resource_id(key.to_string())
                    .with_details(value.clone());
                let audit = audit.clone();
                tokio::spawn(async move {
                    if let Err(e) = audit.append(entry).await {
                        tracing::warn!(error = %e, "Could not append config audit entry");
                    }
                });
            }),
        );
        *self.listener_id.lock() = Some(listener_id);

        self.state.set_ready();
        tracing::info!(backend = %section.db_type, "Storage manager initialized");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        if !self.state.initialized() {
            return Ok(());
        }
        self.bus.unsubscribe(SOURCE);
        if let Some(id) = self.listener_id.lock().take() {
            self.config.unregister_listener(id);
        }
        self.state.set_down();
        Ok(())
    }

    fn status(&self) -> ManagerStatus {
        self.state.status().with_details(serde_json::json!({
            "backend": "memory",
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn storage() -> (Arc<StorageManager>, Arc<EventBus>, Arc<ConfigService>) {
        let config = Arc::new(ConfigService::new(None));
        config.initialize().await.unwrap();
        let bus = EventBus::new(config.clone());
        bus.initialize().await.unwrap();
        let manager = StorageManager::new(config.clone(), bus.clone());
        manager.initialize().await.unwrap();
        (manager, bus, config)
    }

    #[tokio::test]
    async fn test_settings_round_trip() {
        let (storage, _bus, _config) = storage().await;
        let settings = storage.settings();

        settings
            .set(SystemSetting::new("app.ui.theme", serde_json::json!("dark")))
            .await
            .unwrap();
        let setting = settings.get("app.ui.theme").await.unwrap().unwrap();
        assert_eq!(setting.value, serde_json::json!("dark"));

        assert!(settings.delete("app.ui.theme").await.unwrap());
        assert!(settings.get("app.ui.theme").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_non_editable_setting_rejects_writes() {
        let (storage, _bus, _config) = storage().await;
        let settings = storage.settings();

        settings
            .set(SystemSetting::new("app.locked", serde_json::json!(1)).read_only())
            .await
            .unwrap();
        let err = settings
            .set(SystemSetting::new("app.locked", serde_json::json!(2)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_audit_from_events() {
        let (storage, bus, _config) = storage().await;

        bus.publish(
            "security/user_login",
            "security_manager",
            serde_json::json!({"user_id": "u-1"}),
        )
        .unwrap();
        // Unmapped topics do not produce audit entries
        bus.publish("misc/noise", "tester", serde_json::json!({}))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let recent = storage.audit().recent(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].action_type, AuditAction::Login);
    }

    #[tokio::test]
    async fn test_audit_from_config_changes() {
        let (storage, _bus, config) = storage().await;
        config
            .set("app.debug", serde_json::json!(true))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let recent = storage.audit().recent(10).await.unwrap();
        assert!(recent
            .iter()
            .any(|e| e.action_type == AuditAction::Config
                && e.resource_id.as_deref() == Some("app.debug")));
    }
}
