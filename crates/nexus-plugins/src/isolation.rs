//! Plugin isolation manager: bounded invocation of plugin code.
//!
//! Each plugin runs behind an isolation level; concurrent calls to the
//! same `(plugin, method)` are serialized through a per-key mutex while
//! different methods of the same plugin may run concurrently.

use crate::loader::PluginInstance;
use crate::plugin::{
    IsolationLevel, Plugin, PluginFactory, PluginHandle, ResourceLimits,
};
use async_trait::async_trait;
use chrono::Utc;
use nexus_concurrency::ConcurrencyManager;
use nexus_config::schema::PluginsSection;
use nexus_config::ConfigService;
use nexus_core::error::{Error, Result};
use nexus_core::manager::{Manager, ManagerState, ManagerStatus};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Consecutive invocation failures before a plugin is excluded
const FAILURE_LIMIT: u32 = 3;
/// Bound on the optional shutdown hook during unload
const UNLOAD_HOOK_TIMEOUT: Duration = Duration::from_secs(10);

struct LoadedPlugin {
    instance: PluginInstance,
    plugin_id: String,
    isolation_level: IsolationLevel,
    path: Option<PathBuf>,
    loaded_at: chrono::DateTime<Utc>,
    healthy: AtomicBool,
    last_error: Mutex<Option<String>>,
    consecutive_failures: AtomicU32,
    resource_limits: ResourceLimits,
}

impl LoadedPlugin {
    fn handle(&self) -> PluginHandle {
        PluginHandle {
            plugin_id: self.plugin_id.clone(),
            name: self.instance.plugin.name().to_string(),
            version: self.instance.plugin.version().to_string(),
            isolation_level: self.isolation_level,
            path: self.path.as_ref().map(|p| p.display().to_string()),
            loaded_at: self.loaded_at,
            healthy: self.healthy.load(Ordering::SeqCst),
            error: self.last_error.lock().clone(),
            resource_limits: self.resource_limits.clone(),
            metadata: serde_json::json!({
                "description": self.instance.plugin.description(),
            }),
        }
    }

    fn record_failure(&self, message: &str) {
        *self.last_error.lock() = Some(message.to_string());
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= FAILURE_LIMIT {
            self.healthy.store(false, Ordering::SeqCst);
            tracing::warn!(
                plugin = %self.plugin_id,
                failures,
                "Plugin exceeded failure limit, excluding from further invocations"
            );
        }
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }
}

type MethodKey = (String, String);

/// Manager owning every loaded plugin
pub struct PluginIsolationManager {
    state: ManagerState,
    config: Arc<ConfigService>,
    concurrency: Arc<ConcurrencyManager>,
    /// All plugin handles behind one lock; invocations only hold the
    /// per-method lock while running
    plugins: Mutex<HashMap<String, Arc<LoadedPlugin>>>,
    method_locks: Mutex<HashMap<MethodKey, Arc<tokio::sync::Mutex<()>>>>,
    builtins: RwLock<HashMap<String, PluginFactory>>,
    default_level: RwLock<IsolationLevel>,
}

impl PluginIsolationManager {
    pub fn new(config: Arc<ConfigService>, concurrency: Arc<ConcurrencyManager>) -> Arc<Self> {
        Arc::new(Self {
            state: ManagerState::new("plugin_isolation_manager"),
            config,
            concurrency,
            plugins: Mutex::new(HashMap::new()),
            method_locks: Mutex::new(HashMap::new()),
            builtins: RwLock::new(HashMap::new()),
            default_level: RwLock::new(IsolationLevel::Thread),
        })
    }

    /// Register a factory for a built-in (trusted) plugin id
    pub fn register_builtin(&self, plugin_id: &str, factory: PluginFactory) {
        self.builtins
            .write()
            .insert(plugin_id.to_string(), factory);
    }

    /// Load a plugin. Native plugins need a path to their library; ids
    /// with a registered built-in factory load from it instead.
    /// Reloading an already-loaded id unloads it first.
    pub async fn load(
        &self,
        plugin_id: &str,
        path: Option<&Path>,
        isolation_level: Option<IsolationLevel>,
    ) -> Result<PluginHandle> {
        self.ensure_initialized()?;

        if self.is_loaded(plugin_id) {
            tracing::debug!(plugin = plugin_id, "Plugin already loaded, unloading first");
            self.unload(plugin_id).await?;
        }

        let builtin = self.builtins.read().get(plugin_id).cloned();
        let instance = match (builtin, path) {
            (Some(factory), _) => PluginInstance::from_builtin(factory()),
            (None, Some(path)) => PluginInstance::from_native(path)?,
            (None, None) => {
                return Err(Error::validation(format!(
                    "plugin '{plugin_id}' has no built-in factory and no library path"
                )))
            }
        };

        let level = isolation_level.unwrap_or(*self.default_level.read());
        let loaded = Arc::new(LoadedPlugin {
            instance,
            plugin_id: plugin_id.to_string(),
            isolation_level: level,
            path: path.map(Path::to_path_buf),
            loaded_at: Utc::now(),
            healthy: AtomicBool::new(true),
            last_error: Mutex::new(None),
            consecutive_failures: AtomicU32::new(0),
            resource_limits: ResourceLimits::default(),
        });
        let handle = loaded.handle();
        self.plugins.lock().insert(plugin_id.to_string(), loaded);

        tracing::info!(plugin = plugin_id, level = level.as_str(), "Loaded plugin");
        Ok(handle)
    }

    /// Unload a plugin: run its shutdown hook with a bounded timeout,
    /// then release the handle and its method locks.
    pub async fn unload(&self, plugin_id: &str) -> Result<bool> {
        self.ensure_initialized()?;

        let Some(loaded) = self.plugins.lock().remove(plugin_id) else {
            tracing::warn!(plugin = plugin_id, "Plugin is not loaded");
            return Ok(false);
        };

        let plugin = loaded.instance.plugin.clone();
        let hook = self
            .concurrency
            .run_io(move |_| plugin.shutdown());
        match hook {
            Ok(handle) => match tokio::time::timeout(UNLOAD_HOOK_TIMEOUT, handle).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => {
                    tracing::warn!(plugin = plugin_id, error = %e, "Plugin shutdown hook failed")
                }
                Ok(Err(e)) => {
                    tracing::warn!(plugin = plugin_id, error = %e, "Plugin shutdown hook failed")
                }
                Err(_) => {
                    tracing::warn!(plugin = plugin_id, "Plugin shutdown hook timed out")
                }
            },
            Err(e) => {
                tracing::warn!(plugin = plugin_id, error = %e, "Could not run plugin shutdown hook")
            }
        }

        self.method_locks
            .lock()
            .retain(|(id, _), _| id != plugin_id);

        tracing::info!(plugin = plugin_id, "Unloaded plugin");
        Ok(true)
    }

    /// Invoke a plugin method with per-method serialization and an
    /// optional timeout.
    pub async fn invoke(
        &self,
        plugin_id: &str,
        method: &str,
        args: serde_json::Value,
        timeout: Option<Duration>,
    ) -> Result<serde_json::Value> {
        self.ensure_initialized()?;

        let loaded = self
            .plugins
            .lock()
            .get(plugin_id)
            .cloned()
            .ok_or_else(|| Error::PluginNotFound {
                plugin_id: plugin_id.to_string(),
            })?;
        if !loaded.healthy.load(Ordering::SeqCst) {
            return Err(Error::plugin_isolation(
                plugin_id,
                method,
                "plugin is marked unhealthy",
            ));
        }

        let method_lock = {
            let key = (plugin_id.to_string(), method.to_string());
            self.method_locks
                .lock()
                .entry(key)
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let _serialized = method_lock.lock().await;

        let result = self
            .dispatch(&loaded, method, args, timeout)
            .await;
        match &result {
            Ok(_) => loaded.record_success(),
            Err(e) => loaded.record_failure(&e.to_string()),
        }
        result
    }

    async fn dispatch(
        &self,
        loaded: &Arc<LoadedPlugin>,
        method: &str,
        args: serde_json::Value,
        timeout: Option<Duration>,
    ) -> Result<serde_json::Value> {
        let plugin_id = loaded.plugin_id.clone();
        let plugin = loaded.instance.plugin.clone();

        match loaded.isolation_level {
            IsolationLevel::None => plugin
                .invoke(method, args)
                .map_err(|e| Error::plugin_isolation(&plugin_id, method, e.to_string())),
            level => {
                let submit_method = method.to_string();
                let submit = move |pool_plugin: Arc<dyn Plugin>| {
                    move |_token: &nexus_concurrency::CancelToken| {
                        pool_plugin.invoke(&submit_method, args)
                    }
                };
                let handle = match level {
                    IsolationLevel::Thread => self.concurrency.run_io(submit(plugin))?,
                    IsolationLevel::Process => self.concurrency.run_isolated(submit(plugin))?,
                    IsolationLevel::None => unreachable!(),
                };

                let outcome = match timeout {
                    Some(limit) => {
                        let token = handle.cancel_token();
                        match tokio::time::timeout(limit, handle).await {
                            Ok(result) => result,
                            Err(_) => {
                                // The task may still finish; flag it and move on
                                token.cancel();
                                return Err(Error::plugin_isolation(
                                    &plugin_id,
                                    method,
                                    format!("timed out after {:.1}s", limit.as_secs_f64()),
                                ));
                            }
                        }
                    }
                    None => handle.await,
                };

                match outcome {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(Error::plugin_isolation(&plugin_id, method, e.to_string())),
                    Err(e) => Err(Error::plugin_isolation(&plugin_id, method, e.to_string())),
                }
            }
        }
    }

    pub fn is_loaded(&self, plugin_id: &str) -> bool {
        self.plugins.lock().contains_key(plugin_id)
    }

    pub fn get_handle(&self, plugin_id: &str) -> Option<PluginHandle> {
        self.plugins.lock().get(plugin_id).map(|p| p.handle())
    }

    /// Handles for every loaded plugin
    pub fn list(&self) -> Vec<PluginHandle> {
        let mut handles: Vec<PluginHandle> =
            self.plugins.lock().values().map(|p| p.handle()).collect();
        handles.sort_by(|a, b| a.plugin_id.cmp(&b.plugin_id));
        handles
    }

    fn ensure_initialized(&self) -> Result<()> {
        if !self.state.initialized() {
            return Err(Error::application("plugin isolation manager not initialized"));
        }
        Ok(())
    }
}

#[async_trait]
impl Manager for PluginIsolationManager {
    fn name(&self) -> &str {
        self.state.name()
    }

    async fn initialize(&self) -> Result<()> {
        let section: PluginsSection = self.config.section("plugins")?;
        match IsolationLevel::parse(&section.isolation.default_level) {
            Ok(level) => *self.default_level.write() = level,
            Err(_) => {
                tracing::warn!(
                    level = %section.isolation.default_level,
                    "Invalid default isolation level, keeping 'thread'"
                );
            }
        }
        self.state.set_ready();
        tracing::info!(
            default_level = self.default_level.read().as_str(),
            "Plugin isolation manager initialized"
        );
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        if !self.state.initialized() {
            return Ok(());
        }
        let ids: Vec<String> = self.plugins.lock().keys().cloned().collect();
        for plugin_id in ids {
            if let Err(e) = self.unload(&plugin_id).await {
                tracing::warn!(plugin = %plugin_id, error = %e, "Error unloading plugin during shutdown");
            }
        }
        self.method_locks.lock().clear();
        self.state.set_down();
        Ok(())
    }

    fn status(&self) -> ManagerStatus {
        let plugins = self.plugins.lock();
        let mut by_level: HashMap<&'static str, usize> = HashMap::new();
        for plugin in plugins.values() {
            *by_level.entry(plugin.isolation_level.as_str()).or_default() += 1;
        }
        self.state.status().with_details(serde_json::json!({
            "plugins": { "total": plugins.len(), "by_isolation": by_level },
            "default_isolation": self.default_level.read().as_str(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_concurrency::main_dispatcher;
    use std::sync::atomic::AtomicU32;

    /// Test plugin tracking per-method concurrency
    struct ProbePlugin {
        active_a: Arc<AtomicU32>,
        max_a: Arc<AtomicU32>,
        overlap: Arc<AtomicU32>,
        max_overlap: Arc<AtomicU32>,
        fail_method: bool,
    }

    impl ProbePlugin {
        fn track(active: &AtomicU32, max: &AtomicU32) -> u32 {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            max.fetch_max(now, Ordering::SeqCst);
            now
        }
    }

    impl Plugin for ProbePlugin {
        fn name(&self) -> &str {
            "probe"
        }
        fn version(&self) -> &str {
            "1.0.0"
        }
        fn invoke(&self, method: &str, args: serde_json::Value) -> Result<serde_json::Value> {
            match method {
                "method_a" => {
                    Self::track(&self.active_a, &self.max_a);
                    Self::track(&self.overlap, &self.max_overlap);
                    std::thread::sleep(Duration::from_millis(80));
                    self.active_a.fetch_sub(1, Ordering::SeqCst);
                    self.overlap.fetch_sub(1, Ordering::SeqCst);
                    Ok(serde_json::json!("a-done"))
                }
                "method_b" => {
                    Self::track(&self.overlap, &self.max_overlap);
                    std::thread::sleep(Duration::from_millis(80));
                    self.overlap.fetch_sub(1, Ordering::SeqCst);
                    Ok(serde_json::json!("b-done"))
                }
                "slow" => {
                    std::thread::sleep(Duration::from_millis(500));
                    Ok(serde_json::json!("slow-done"))
                }
                "boom" if self.fail_method => {
                    Err(Error::application("plugin method exploded"))
                }
                "echo" => Ok(args),
                other => Err(Error::application(format!("no such method '{other}'"))),
            }
        }
    }

    struct CountingShutdownPlugin {
        shutdowns: Arc<AtomicU32>,
    }

    impl Plugin for CountingShutdownPlugin {
        fn name(&self) -> &str {
            "counter"
        }
        fn version(&self) -> &str {
            "0.1.0"
        }
        fn invoke(&self, _method: &str, _args: serde_json::Value) -> Result<serde_json::Value> {
            Ok(serde_json::json!(null))
        }
        fn shutdown(&self) -> Result<()> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Counters {
        active_a: Arc<AtomicU32>,
        max_a: Arc<AtomicU32>,
        overlap: Arc<AtomicU32>,
        max_overlap: Arc<AtomicU32>,
    }

    async fn isolation() -> Arc<PluginIsolationManager> {
        let config = Arc::new(ConfigService::new(None));
        config.initialize().await.unwrap();
        let (dispatcher, _main_loop) = main_dispatcher();
        let concurrency = ConcurrencyManager::new(config.clone(), dispatcher);
        concurrency.initialize().await.unwrap();
        let manager = PluginIsolationManager::new(config, concurrency);
        manager.initialize().await.unwrap();
        manager
    }

    fn register_probe(manager: &PluginIsolationManager, fail_method: bool) -> Counters {
        let counters = Counters {
            active_a: Arc::new(AtomicU32::new(0)),
            max_a: Arc::new(AtomicU32::new(0)),
            overlap: Arc::new(AtomicU32::new(0)),
            max_overlap: Arc::new(AtomicU32::new(0)),
        };
        let (active_a, max_a) = (counters.active_a.clone(), counters.max_a.clone());
        let (overlap, max_overlap) = (counters.overlap.clone(), counters.max_overlap.clone());
        manager.register_builtin(
            "probe",
            Arc::new(move || {
                Box::new(ProbePlugin {
                    active_a: active_a.clone(),
                    max_a: max_a.clone(),
                    overlap: overlap.clone(),
                    max_overlap: max_overlap.clone(),
                    fail_method,
                })
            }),
        );
        counters
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_method_serialized_different_methods_concurrent() {
        let manager = isolation().await;
        let counters = register_probe(&manager, false);
        manager
            .load("probe", None, Some(IsolationLevel::Thread))
            .await
            .unwrap();

        let m = manager.clone();
        let a1 = tokio::spawn(async move {
            m.invoke("probe", "method_a", serde_json::json!(null), None).await
        });
        let m = manager.clone();
        let a2 = tokio::spawn(async move {
            m.invoke("probe", "method_a", serde_json::json!(null), None).await
        });
        let m = manager.clone();
        let b = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            m.invoke("probe", "method_b", serde_json::json!(null), None).await
        });

        a1.await.unwrap().unwrap();
        a2.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        // The two method_a calls never overlapped
        assert_eq!(counters.max_a.load(Ordering::SeqCst), 1);
        // method_b ran while a method_a call was active
        assert!(counters.max_overlap.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_load_unload_load_is_independent() {
        let manager = isolation().await;
        let shutdowns = Arc::new(AtomicU32::new(0));
        let shutdowns_factory = shutdowns.clone();
        manager.register_builtin(
            "counter",
            Arc::new(move || {
                Box::new(CountingShutdownPlugin {
                    shutdowns: shutdowns_factory.clone(),
                })
            }),
        );

        manager.load("counter", None, None).await.unwrap();
        assert!(manager.is_loaded("counter"));
        assert!(manager.unload("counter").await.unwrap());
        assert!(!manager.is_loaded("counter"));
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);

        // Second load is independent of the first
        manager.load("counter", None, None).await.unwrap();
        assert!(manager.is_loaded("counter"));
    }

    #[tokio::test]
    async fn test_reload_unloads_first() {
        let manager = isolation().await;
        let shutdowns = Arc::new(AtomicU32::new(0));
        let shutdowns_factory = shutdowns.clone();
        manager.register_builtin(
            "counter",
            Arc::new(move || {
                Box::new(CountingShutdownPlugin {
                    shutdowns: shutdowns_factory.clone(),
                })
            }),
        );

        manager.load("counter", None, None).await.unwrap();
        manager.load("counter", None, None).await.unwrap();
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
        assert!(manager.is_loaded("counter"));
    }

    #[tokio::test]
    async fn test_invoke_timeout() {
        let manager = isolation().await;
        register_probe(&manager, false);
        manager
            .load("probe", None, Some(IsolationLevel::Thread))
            .await
            .unwrap();

        let err = manager
            .invoke(
                "probe",
                "slow",
                serde_json::json!(null),
                Some(Duration::from_millis(50)),
            )
            .await
            .unwrap_err();
        match err {
            Error::PluginIsolation { plugin, method, .. } => {
                assert_eq!(plugin, "probe");
                assert_eq!(method, "slow");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_plugin_error_wrapped_with_message() {
        let manager = isolation().await;
        register_probe(&manager, true);
        manager
            .load("probe", None, Some(IsolationLevel::Thread))
            .await
            .unwrap();

        let err = manager
            .invoke("probe", "boom", serde_json::json!(null), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("plugin method exploded"));
    }

    #[tokio::test]
    async fn test_persistent_failures_mark_unhealthy() {
        let manager = isolation().await;
        register_probe(&manager, true);
        manager
            .load("probe", None, Some(IsolationLevel::None))
            .await
            .unwrap();

        for _ in 0..3 {
            let _ = manager
                .invoke("probe", "boom", serde_json::json!(null), None)
                .await;
        }
        let handle = manager.get_handle("probe").unwrap();
        assert!(!handle.healthy);

        // Excluded from further invocations until reloaded
        let err = manager
            .invoke("probe", "echo", serde_json::json!(1), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unhealthy"));

        manager
            .load("probe", None, Some(IsolationLevel::None))
            .await
            .unwrap();
        assert!(manager.get_handle("probe").unwrap().healthy);
    }

    #[tokio::test]
    async fn test_inline_isolation_echo() {
        let manager = isolation().await;
        register_probe(&manager, false);
        manager
            .load("probe", None, Some(IsolationLevel::None))
            .await
            .unwrap();

        let result = manager
            .invoke("probe", "echo", serde_json::json!({"x": 5}), None)
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!({"x": 5}));
    }

    #[tokio::test]
    async fn test_isolated_pool_dispatch() {
        let manager = isolation().await;
        register_probe(&manager, false);
        manager
            .load("probe", None, Some(IsolationLevel::Process))
            .await
            .unwrap();

        let result = manager
            .invoke("probe", "echo", serde_json::json!("isolated"), None)
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!("isolated"));
    }

    #[tokio::test]
    async fn test_failed_load_leaves_no_handle() {
        let manager = isolation().await;
        let err = manager
            .load("ghost", Some(Path::new("/nonexistent/libghost.so")), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(!manager.is_loaded("ghost"));
    }
}
