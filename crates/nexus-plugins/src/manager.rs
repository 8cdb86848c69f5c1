//! Plugin manager: discovery, autoload, and enable/disable bookkeeping on
//! top of the isolation manager.

use crate::isolation::PluginIsolationManager;
use crate::loader::{discover, DiscoveredPlugin};
use crate::plugin::{IsolationLevel, PluginHandle};
use async_trait::async_trait;
use nexus_config::schema::PluginsSection;
use nexus_config::ConfigService;
use nexus_core::error::Result;
use nexus_core::manager::{Manager, ManagerState, ManagerStatus};
use nexus_events::{topics, EventBus};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

const SOURCE: &str = "plugin_manager";

/// Manager driving plugin lifecycle from configuration
pub struct PluginManager {
    state: ManagerState,
    config: Arc<ConfigService>,
    bus: Arc<EventBus>,
    isolation: Arc<PluginIsolationManager>,
    /// Discovered manifests by plugin id
    discovered: RwLock<HashMap<String, DiscoveredPlugin>>,
}

impl PluginManager {
    pub fn new(
        config: Arc<ConfigService>,
        bus: Arc<EventBus>,
        isolation: Arc<PluginIsolationManager>,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: ManagerState::new("plugin_manager"),
            config,
            bus,
            isolation,
            discovered: RwLock::new(HashMap::new()),
        })
    }

    fn section(&self) -> Result<PluginsSection> {
        self.config.section("plugins")
    }

    /// Rescan the configured plugin directory
    pub fn rescan(&self) -> Result<usize> {
        let section = self.section()?;
        let found = discover(&PathBuf::from(&section.directory))?;
        let mut discovered = self.discovered.write();
        discovered.clear();
        for plugin in found {
            discovered.insert(plugin.manifest.plugin.id.clone(), plugin);
        }
        Ok(discovered.len())
    }

    fn library_path(plugin: &DiscoveredPlugin) -> Option<PathBuf> {
        plugin
            .manifest
            .plugin
            .entry
            .as_ref()
            .map(|entry| plugin.path.join(entry))
    }

    /// Load one plugin by id, from its discovered manifest or a built-in
    /// factory registration.
    pub async fn load_plugin(&self, plugin_id: &str) -> Result<PluginHandle> {
        let discovered = self.discovered.read().get(plugin_id).cloned();
        let (path, level) = match &discovered {
            Some(plugin) => {
                let level = plugin
                    .manifest
                    .plugin
                    .isolation
                    .as_deref()
                    .map(IsolationLevel::parse)
                    .transpose()?;
                (Self::library_path(plugin), level)
            }
            None => (None, None),
        };

        let handle = self
            .isolation
            .load(plugin_id, path.as_deref(), level)
            .await?;
        self.publish(topics::PLUGIN_LOADED, plugin_id, &handle);
        Ok(handle)
    }

    pub async fn unload_plugin(&self, plugin_id: &str) -> Result<bool> {
        let unloaded = self.isolation.unload(plugin_id).await?;
        if unloaded {
            if let Err(e) = self.bus.publish(
                topics::PLUGIN_UNLOADED,
                SOURCE,
                serde_json::json!({ "plugin_id": plugin_id }),
            ) {
                tracing::debug!(error = %e, "Could not publish plugin event");
            }
        }
        Ok(unloaded)
    }

    /// Add the plugin to `plugins.enabled` (dropping it from
    /// `plugins.disabled`) and load it.
    pub async fn enable_plugin(&self, plugin_id: &str) -> Result<PluginHandle> {
        let section = self.section()?;
        let mut enabled = section.enabled.clone();
        if !enabled.iter().any(|id| id == plugin_id) {
            enabled.push(plugin_id.to_string());
        }
        let disabled: Vec<String> = section
            .disabled
            .into_iter()
            .filter(|id| id != plugin_id)
            .collect();
        self.config
            .set("plugins.enabled", serde_json::json!(enabled))?;
        self.config
            .set("plugins.disabled", serde_json::json!(disabled))?;
        self.load_plugin(plugin_id).await
    }

    /// Add the plugin to `plugins.disabled` and unload it
    pub async fn disable_plugin(&self, plugin_id: &str) -> Result<bool> {
        let section = self.section()?;
        let mut disabled = section.disabled.clone();
        if !disabled.iter().any(|id| id == plugin_id) {
            disabled.push(plugin_id.to_string());
        }
        let enabled: Vec<String> = section
            .enabled
            .into_iter()
            .filter(|id| id != plugin_id)
            .collect();
        self.config
            .set("plugins.enabled", serde_json::json!(enabled))?;
        self.config
            .set("plugins.disabled", serde_json::json!(disabled))?;
        self.unload_plugin(plugin_id).await
    }

    /// Loaded plugin handles
    pub fn list_loaded(&self) -> Vec<PluginHandle> {
        self.isolation.list()
    }

    /// Discovered-but-not-necessarily-loaded plugin ids
    pub fn list_discovered(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.discovered.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn isolation(&self) -> &Arc<PluginIsolationManager> {
        &self.isolation
    }

    fn publish(&self, topic: &str, plugin_id: &str, handle: &PluginHandle) {
        if let Err(e) = self.bus.publish(
            topic,
            SOURCE,
            serde_json::json!({
                "plugin_id": plugin_id,
                "name": handle.name,
                "version": handle.version,
                "isolation_level": handle.isolation_level.as_str(),
            }),
        ) {
            tracing::debug!(error = %e, "Could not publish plugin event");
        }
    }
}

#[async_trait]
impl Manager for PluginManager {
    fn name(&self) -> &str {
        self.state.name()
    }

    async fn initialize(&self) -> Result<()> {
        let section = self.section()?;
        let found = self.rescan()?;
        self.state.set_ready();

        if section.autoload {
            // With an explicit enabled list only those load; otherwise
            // everything discovered loads except the disabled set.
            let candidates: Vec<String> = if section.enabled.is_empty() {
                self.list_discovered()
            } else {
                section.enabled.clone()
            };
            for plugin_id in candidates {
                if section.disabled.iter().any(|id| *id == plugin_id) {
                    continue;
                }
                if let Err(e) = self.load_plugin(&plugin_id).await {
                    tracing::error!(plugin = %plugin_id, error = %e, "Autoload failed");
                }
            }
        }

        tracing::info!(discovered = found, "Plugin manager initialized");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        if !self.state.initialized() {
            return Ok(());
        }
        let loaded = self.isolation.list();
        for handle in loaded {
            if let Err(e) = self.unload_plugin(&handle.plugin_id).await {
                tracing::warn!(plugin = %handle.plugin_id, error = %e, "Error unloading plugin");
            }
        }
        self.discovered.write().clear();
        self.state.set_down();
        Ok(())
    }

    fn status(&self) -> ManagerStatus {
        self.state.status().with_details(serde_json::json!({
            "discovered": self.discovered.read().len(),
            "loaded": self.isolation.list().len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::Plugin;
    use nexus_concurrency::{main_dispatcher, ConcurrencyManager};

    struct NoopPlugin;

    impl Plugin for NoopPlugin {
        fn name(&self) -> &str {
            "noop"
        }
        fn version(&self) -> &str {
            "1.0.0"
        }
        fn invoke(&self, _method: &str, _args: serde_json::Value) -> Result<serde_json::Value> {
            Ok(serde_json::json!(null))
        }
    }

    async fn plugin_manager(plugin_dir: Option<&str>) -> (Arc<PluginManager>, Arc<ConfigService>) {
        let config = Arc::new(ConfigService::new(None));
        config.initialize().await.unwrap();
        config
            .set("plugins.autoload", serde_json::json!(false))
            .unwrap();
        if let Some(dir) = plugin_dir {
            config
                .set("plugins.directory", serde_json::json!(dir))
                .unwrap();
        }

        let bus = EventBus::new(config.clone());
        bus.initialize().await.unwrap();
        let (dispatcher, _main_loop) = main_dispatcher();
        let concurrency = ConcurrencyManager::new(config.clone(), dispatcher);
        concurrency.initialize().await.unwrap();
        let isolation = PluginIsolationManager::new(config.clone(), concurrency);
        isolation.initialize().await.unwrap();

        let manager = PluginManager::new(config.clone(), bus, isolation);
        manager.initialize().await.unwrap();
        (manager, config)
    }

    #[tokio::test]
    async fn test_builtin_load_and_unload() {
        let (manager, _config) = plugin_manager(None).await;
        manager
            .isolation()
            .register_builtin("noop", Arc::new(|| Box::new(NoopPlugin)));

        let handle = manager.load_plugin("noop").await.unwrap();
        assert_eq!(handle.name, "noop");
        assert_eq!(manager.list_loaded().len(), 1);

        assert!(manager.unload_plugin("noop").await.unwrap());
        assert!(manager.list_loaded().is_empty());
    }

    #[tokio::test]
    async fn test_enable_disable_updates_config() {
        let (manager, config) = plugin_manager(None).await;
        manager
            .isolation()
            .register_builtin("noop", Arc::new(|| Box::new(NoopPlugin)));

        manager.enable_plugin("noop").await.unwrap();
        let section: PluginsSection = config.section("plugins").unwrap();
        assert!(section.enabled.contains(&"noop".to_string()));
        assert!(manager.isolation().is_loaded("noop"));

        manager.disable_plugin("noop").await.unwrap();
        let section: PluginsSection = config.section("plugins").unwrap();
        assert!(section.disabled.contains(&"noop".to_string()));
        assert!(!section.enabled.contains(&"noop".to_string()));
        assert!(!manager.isolation().is_loaded("noop"));
    }

    #[tokio::test]
    async fn test_discovery_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        let plugin_dir = dir.path().join("discovered");
        std::fs::create_dir_all(&plugin_dir).unwrap();
        std::fs::write(
            plugin_dir.join("plugin.toml"),
            "[plugin]\nid = \"discovered\"\nname = \"Discovered\"\nversion = \"0.1.0\"\n",
        )
        .unwrap();

        let (manager, _config) =
            plugin_manager(Some(dir.path().to_str().unwrap())).await;
        assert_eq!(manager.list_discovered(), vec!["discovered".to_string()]);
    }

    #[tokio::test]
    async fn test_shutdown_unloads_everything() {
        let (manager, _config) = plugin_manager(None).await;
        manager
            .isolation()
            .register_builtin("noop", Arc::new(|| Box::new(NoopPlugin)));
        manager.load_plugin("noop").await.unwrap();

        manager.shutdown().await.unwrap();
        assert!(manager.list_loaded().is_empty());
    }
}
