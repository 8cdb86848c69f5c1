//! Logging manager: adapts the `logging` config section to the tracing
//! bootstrap.

use async_trait::async_trait;
use nexus_config::schema::LoggingSection;
use nexus_config::ConfigService;
use nexus_core::error::Result;
use nexus_core::logging::{init_logging, LogFormat, LogOptions, LoggingGuard};
use nexus_core::manager::{Manager, ManagerState, ManagerStatus};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;

pub struct LoggingManager {
    state: ManagerState,
    config: Arc<ConfigService>,
    guard: Mutex<Option<LoggingGuard>>,
    options: Mutex<Option<LogOptions>>,
}

impl LoggingManager {
    pub fn new(config: Arc<ConfigService>) -> Arc<Self> {
        Arc::new(Self {
            state: ManagerState::new("logging_manager"),
            config,
            guard: Mutex::new(None),
            options: Mutex::new(None),
        })
    }
}

#[async_trait]
impl Manager for LoggingManager {
    fn name(&self) -> &str {
        self.state.name()
    }

    async fn initialize(&self) -> Result<()> {
        let section: LoggingSection = self.config.section("logging")?;
        let options = LogOptions {
            level: section.level.clone(),
            format: LogFormat::parse(&section.format)?,
            console: section.console.enabled,
            file: section
                .file
                .enabled
                .then(|| PathBuf::from(&section.file.path)),
        };

        let guard = init_logging(&options)?;
        *self.guard.lock() = Some(guard);
        *self.options.lock() = Some(options);
        self.state.set_ready();
        tracing::info!(level = %section.level, format = %section.format, "Logging initialized");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        // The guard flushes the file writer when dropped
        self.guard.lock().take();
        self.state.set_down();
        Ok(())
    }

    fn status(&self) -> ManagerStatus {
        let details = self
            .options
            .lock()
            .as_ref()
            .map(|options| {
                serde_json::json!({
                    "level": options.level,
                    "console": options.console,
                    "file": options.file.as_ref().map(|p| p.display().to_string()),
                })
            })
            .unwrap_or(serde_json::Value::Null);
        self.state.status().with_details(details)
    }
}
