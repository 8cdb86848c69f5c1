//! Application core: wires every manager, hands them to the registry, and
//! operates the process lifecycle.

use crate::managers::{
    CloudManager, FileManager, LoggingManager, StorageManager, TaskManager,
};
use nexus_api::{ApiManager, ApiState};
use nexus_concurrency::{main_dispatcher, ConcurrencyManager, MainLoop};
use nexus_config::ConfigService;
use nexus_core::error::{Error, Result};
use nexus_core::registry::{ManagerRegistry, ShutdownSummary};
use nexus_events::{topics, EventBus};
use nexus_monitor::ResourceMonitor;
use nexus_plugins::{PluginIsolationManager, PluginManager};
use nexus_security::SecurityManager;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

const SOURCE: &str = "app_core";

/// The process-level host composing all managers behind one lifecycle
pub struct ApplicationCore {
    registry: Arc<ManagerRegistry>,
    config: Arc<ConfigService>,
    bus: Arc<EventBus>,
    concurrency: Arc<ConcurrencyManager>,
    security: Arc<SecurityManager>,
    monitor: Arc<ResourceMonitor>,
    plugins: Arc<PluginManager>,
    api: Arc<ApiManager>,
    main_loop: Mutex<Option<MainLoop>>,
    shutdown_requested: Notify,
    initialized: AtomicBool,
}

impl ApplicationCore {
    /// Construct every manager and register the dependency graph.
    ///
    /// Must be called on the main thread; the caller's thread becomes the
    /// main-dispatch affinity target. Actual initialization order is
    /// computed by the registry DAG, not the construction sequence.
    pub fn build(config_path: Option<PathBuf>) -> Result<Self> {
        let registry = Arc::new(ManagerRegistry::new());

        let config = Arc::new(ConfigService::new(config_path));
        registry.register(config.clone(), &[])?;

        let logging = LoggingManager::new(config.clone());
        registry.register(logging, &["config_manager"])?;

        let (dispatcher, main_loop) = main_dispatcher();
        let concurrency = ConcurrencyManager::new(config.clone(), dispatcher);
        registry.register(concurrency.clone(), &["config_manager", "logging_manager"])?;

        let bus = EventBus::new(config.clone());
        registry.register(
            bus.clone(),
            &["config_manager", "logging_manager", "concurrency_manager"],
        )?;

        let files = FileManager::new(config.clone());
        registry.register(files, &["config_manager", "logging_manager"])?;

        let monitor = ResourceMonitor::new(config.clone(), bus.clone(), concurrency.clone());
        registry.register(
            monitor.clone(),
            &[
                "config_manager",
                "logging_manager",
                "event_bus_manager",
                "concurrency_manager",
            ],
        )?;

        let storage = StorageManager::new(config.clone(), bus.clone());
        registry.register(
            storage,
            &["config_manager", "logging_manager", "event_bus_manager"],
        )?;

        let security = SecurityManager::new(config.clone(), bus.clone());
        registry.register(
            security.clone(),
            &[
                "config_manager",
                "logging_manager",
                "event_bus_manager",
                "storage_manager",
            ],
        )?;

        // Plugin hosting is constructed before the API (the API exposes
        // it) but registered in wiring order below.
        let isolation = PluginIsolationManager::new(config.clone(), concurrency.clone());
        let plugins = PluginManager::new(config.clone(), bus.clone(), isolation.clone());

        let api = ApiManager::new(ApiState {
            config: config.clone(),
            security: security.clone(),
            monitor: monitor.clone(),
            plugins: plugins.clone(),
            registry: registry.clone(),
            app_name: "Nexus".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        });
        registry.register(
            api.clone(),
            &[
                "config_manager",
                "logging_manager",
                "security_manager",
                "event_bus_manager",
                "concurrency_manager",
            ],
        )?;

        let cloud = CloudManager::new(config.clone());
        registry.register(
            cloud,
            &["config_manager", "logging_manager", "file_manager"],
        )?;

        let tasks = TaskManager::new();
        registry.register(
            tasks,
            &[
                "config_manager",
                "logging_manager",
                "event_bus_manager",
                "concurrency_manager",
            ],
        )?;

        registry.register(
            isolation,
            &["config_manager", "logging_manager", "concurrency_manager"],
        )?;
        registry.register(
            plugins.clone(),
            &[
                "config_manager",
                "logging_manager",
                "event_bus_manager",
                "file_manager",
                "task_manager",
                "plugin_isolation_manager",
            ],
        )?;

        Ok(Self {
            registry,
            config,
            bus,
            concurrency,
            security,
            monitor,
            plugins,
            api,
            main_loop: Mutex::new(Some(main_loop)),
            shutdown_requested: Notify::new(),
            initialized: AtomicBool::new(false),
        })
    }

    /// Initialize every manager in dependency order and announce startup
    pub async fn initialize(&self) -> Result<()> {
        let order = self.registry.initialize_all().await.map_err(|e| {
            tracing::error!(error = %e, "Initialization failed");
            e
        })?;
        self.initialized.store(true, Ordering::SeqCst);
        tracing::info!(?order, "Nexus initialization complete");

        let version = self
            .config
            .get("app.version")
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());
        if let Err(e) = self.bus.publish(
            topics::SYSTEM_STARTED,
            SOURCE,
            serde_json::json!({ "version": version }),
        ) {
            tracing::warn!(error = %e, "Could not publish startup event");
        }
        Ok(())
    }

    /// Shut down every initialized manager in reverse order.
    ///
    /// Also handles the partially-initialized case after a failed
    /// startup: whatever did come up is taken down in order.
    pub async fn shutdown(&self) -> Result<ShutdownSummary> {
        let was_running = self.initialized.swap(false, Ordering::SeqCst);
        if !was_running && self.registry.initialized_managers().is_empty() {
            return Ok(ShutdownSummary::default());
        }
        tracing::info!("Shutting down Nexus");

        // Non-blocking enqueue; the bus drains what it holds before its
        // own shutdown, so this cannot hang the shutdown path.
        if let Err(e) = self
            .bus
            .publish(topics::SYSTEM_SHUTTING_DOWN, SOURCE, serde_json::json!({}))
        {
            tracing::warn!(error = %e, "Could not publish shutdown event");
        }

        let summary = self.registry.shutdown_all().await;
        if summary.all_succeeded() {
            tracing::info!("Nexus shutdown complete");
        } else {
            tracing::warn!(
                errors = summary.errors.len(),
                timed_out = summary.timed_out.len(),
                skipped = summary.skipped.len(),
                "Nexus shutdown finished with problems"
            );
        }
        Ok(summary)
    }

    /// Serve until an interrupt signal or a shutdown request arrives
    pub async fn run(&self) -> Result<()> {
        let driver = self
            .main_loop
            .lock()
            .take()
            .map(|main_loop| tokio::spawn(main_loop.run()));

        self.wait_for_stop_signal().await?;
        self.shutdown().await?;

        if let Some(driver) = driver {
            driver.abort();
        }
        Ok(())
    }

    #[cfg(unix)]
    async fn wait_for_stop_signal(&self) -> Result<()> {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .map_err(|e| Error::application(format!("cannot install signal handler: {e}")))?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("Received interrupt signal"),
            _ = sigterm.recv() => tracing::info!("Received terminate signal"),
            _ = self.shutdown_requested.notified() => {}
        }
        Ok(())
    }

    #[cfg(not(unix))]
    async fn wait_for_stop_signal(&self) -> Result<()> {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("Received interrupt signal"),
            _ = self.shutdown_requested.notified() => {}
        }
        Ok(())
    }

    /// Ask a running `run()` to shut the application down
    pub fn request_shutdown(&self) {
        self.shutdown_requested.notify_waiters();
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Aggregate status over every registered manager
    pub fn status(&self) -> serde_json::Value {
        serde_json::json!({
            "name": "ApplicationCore",
            "initialized": self.is_initialized(),
            "version": env!("CARGO_PKG_VERSION"),
            "managers": self.registry.statuses(),
        })
    }

    pub fn registry(&self) -> &Arc<ManagerRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &Arc<ConfigService> {
        &self.config
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn concurrency(&self) -> &Arc<ConcurrencyManager> {
        &self.concurrency
    }

    pub fn security(&self) -> &Arc<SecurityManager> {
        &self.security
    }

    pub fn monitor(&self) -> &Arc<ResourceMonitor> {
        &self.monitor
    }

    pub fn plugins(&self) -> &Arc<PluginManager> {
        &self.plugins
    }

    pub fn api(&self) -> &Arc<ApiManager> {
        &self.api
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_events::handler;
    use std::io::Write;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn test_config_file(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("config.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            "api:\n  port: 0\n  rate_limit:\n    enabled: false\nmonitoring:\n  enabled: false\nplugins:\n  autoload: false\nfiles:\n  base_directory: {base}\n  temp_directory: {base}/temp\n  plugin_data_directory: {base}/plugins\n  backup_directory: {base}/backups\n",
            base = dir.path().join("data").display()
        )
        .unwrap();
        path
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let app = ApplicationCore::build(Some(test_config_file(&dir))).unwrap();

        let started = Arc::new(AtomicU32::new(0));
        let started_cb = started.clone();
        app.event_bus()
            .subscribe(
                topics::SYSTEM_STARTED,
                "test-observer",
                handler(move |_| {
                    let hits = started_cb.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
            )
            .unwrap();

        app.initialize().await.unwrap();
        assert!(app.is_initialized());

        // Every manager reports initialized and healthy
        let status = app.status();
        let managers = status["managers"].as_array().unwrap();
        assert_eq!(managers.len(), 13);
        for manager in managers {
            assert_eq!(manager["initialized"], true, "{}", manager["name"]);
            assert_eq!(manager["healthy"], true, "{}", manager["name"]);
        }

        // The API bound an ephemeral port
        assert!(app.api().bound_addr().is_some());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(started.load(Ordering::SeqCst), 1);

        let summary = app.shutdown().await.unwrap();
        assert!(summary.all_succeeded());
        assert!(!app.is_initialized());
        assert!(app.status()["managers"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_initialization_order_respects_dependencies() {
        let dir = tempfile::tempdir().unwrap();
        let app = ApplicationCore::build(Some(test_config_file(&dir))).unwrap();
        let order = app.registry().topological_order().unwrap();

        let position = |name: &str| order.iter().position(|n| n == name).unwrap();
        assert!(position("config_manager") < position("logging_manager"));
        assert!(position("logging_manager") < position("concurrency_manager"));
        assert!(position("concurrency_manager") < position("event_bus_manager"));
        assert!(position("event_bus_manager") < position("security_manager"));
        assert!(position("security_manager") < position("api_manager"));
        assert!(position("plugin_isolation_manager") < position("plugin_manager"));

        app.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_second_shutdown_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let app = ApplicationCore::build(Some(test_config_file(&dir))).unwrap();
        app.initialize().await.unwrap();
        app.shutdown().await.unwrap();
        let summary = app.shutdown().await.unwrap();
        assert!(summary.all_succeeded());
    }
}
