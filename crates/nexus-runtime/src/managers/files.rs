//! File manager: owns the filesystem roots from the `files` section.

use async_trait::async_trait;
use nexus_config::schema::FilesSection;
use nexus_config::ConfigService;
use nexus_core::error::{Error, Result};
use nexus_core::manager::{Manager, ManagerState, ManagerStatus};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct FileRoots {
    base: PathBuf,
    temp: PathBuf,
    plugin_data: PathBuf,
    backup: PathBuf,
}

pub struct FileManager {
    state: ManagerState,
    config: Arc<ConfigService>,
    roots: RwLock<Option<FileRoots>>,
}

impl FileManager {
    pub fn new(config: Arc<ConfigService>) -> Arc<Self> {
        Arc::new(Self {
            state: ManagerState::new("file_manager"),
            config,
            roots: RwLock::new(None),
        })
    }

    fn roots(&self) -> Result<FileRoots> {
        self.roots
            .read()
            .clone()
            .ok_or_else(|| Error::application("file manager not initialized"))
    }

    pub fn base_dir(&self) -> Result<PathBuf> {
        Ok(self.roots()?.base)
    }

    pub fn temp_dir(&self) -> Result<PathBuf> {
        Ok(self.roots()?.temp)
    }

    pub fn plugin_data_dir(&self) -> Result<PathBuf> {
        Ok(self.roots()?.plugin_data)
    }

    pub fn backup_dir(&self) -> Result<PathBuf> {
        Ok(self.roots()?.backup)
    }

    /// A unique path inside the temp root
    pub fn temp_file(&self, prefix: &str) -> Result<PathBuf> {
        Ok(self.temp_dir()?.join(format!("{prefix}-{}", Uuid::new_v4())))
    }

    /// Resolve a plugin's private data directory, creating it on demand
    pub fn plugin_data_for(&self, plugin_id: &str) -> Result<PathBuf> {
        let dir = self.plugin_data_dir()?.join(plugin_id);
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::application(format!("cannot create {}: {e}", dir.display())))?;
        Ok(dir)
    }
}

#[async_trait]
impl Manager for FileManager {
    fn name(&self) -> &str {
        self.state.name()
    }

    async fn initialize(&self) -> Result<()> {
        let section: FilesSection = self.config.section("files")?;
        let roots = FileRoots {
            base: PathBuf::from(&section.base_directory),
            temp: PathBuf::from(&section.temp_directory),
            plugin_data: PathBuf::from(&section.plugin_data_directory),
            backup: PathBuf::from(&section.backup_directory),
        };

        for dir in [&roots.base, &roots.temp, &roots.plugin_data, &roots.backup] {
            std::fs::create_dir_all(dir).map_err(|e| {
                Error::manager_init(
                    "file_manager",
                    format!("cannot create {}: {e}", dir.display()),
                )
            })?;
        }

        *self.roots.write() = Some(roots);
        self.state.set_ready();
        tracing::info!(base = %section.base_directory, "File manager initialized");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.roots.write().take();
        self.state.set_down();
        Ok(())
    }

    fn status(&self) -> ManagerStatus {
        let details = self
            .roots
            .read()
            .as_ref()
            .map(|roots| {
                serde_json::json!({
                    "base_directory": roots.base.display().to_string(),
                    "temp_directory": roots.temp.display().to_string(),
                    "plugin_data_directory": roots.plugin_data.display().to_string(),
                    "backup_directory": roots.backup.display().to_string(),
                })
            })
            .unwrap_or(serde_json::Value::Null);
        self.state.status().with_details(details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn file_manager(base: &std::path::Path) -> Arc<FileManager> {
        let config = Arc::new(ConfigService::new(None));
        config.initialize().await.unwrap();
        for (key, sub) in [
            ("files.base_directory", ""),
            ("files.temp_directory", "temp"),
            ("files.plugin_data_directory", "plugins"),
            ("files.backup_directory", "backups"),
        ] {
            let path = if sub.is_empty() {
                base.to_path_buf()
            } else {
                base.join(sub)
            };
            config
                .set(key, serde_json::json!(path.display().to_string()))
                .unwrap();
        }
        let manager = FileManager::new(config);
        manager.initialize().await.unwrap();
        manager
    }

    #[tokio::test]
    async fn test_creates_roots() {
        let dir = tempfile::tempdir().unwrap();
        let manager = file_manager(dir.path()).await;
        assert!(manager.temp_dir().unwrap().exists());
        assert!(manager.backup_dir().unwrap().exists());
    }

    #[tokio::test]
    async fn test_temp_files_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let manager = file_manager(dir.path()).await;
        let a = manager.temp_file("job").unwrap();
        let b = manager.temp_file("job").unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_plugin_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let manager = file_manager(dir.path()).await;
        let plugin_dir = manager.plugin_data_for("demo").unwrap();
        assert!(plugin_dir.exists());
        assert!(plugin_dir.ends_with("demo"));
    }
}
