//! Cloud manager: optional blob backend configuration surface.
//!
//! Provider `none` keeps storage off. Actual blob I/O is a collaborator
//! behind this manager; the runtime only validates and reports the
//! configuration.

use async_trait::async_trait;
use nexus_config::schema::CloudSection;
use nexus_config::ConfigService;
use nexus_core::error::{Error, Result};
use nexus_core::manager::{Manager, ManagerState, ManagerStatus};
use parking_lot::RwLock;
use std::sync::Arc;

const KNOWN_PROVIDERS: &[&str] = &["none", "aws", "azure", "gcp"];

pub struct CloudManager {
    state: ManagerState,
    config: Arc<ConfigService>,
    section: RwLock<Option<CloudSection>>,
}

impl CloudManager {
    pub fn new(config: Arc<ConfigService>) -> Arc<Self> {
        Arc::new(Self {
            state: ManagerState::new("cloud_manager"),
            config,
            section: RwLock::new(None),
        })
    }

    pub fn storage_enabled(&self) -> bool {
        self.section
            .read()
            .as_ref()
            .map(|s| s.provider != "none" && s.storage.enabled)
            .unwrap_or(false)
    }
}

#[async_trait]
impl Manager for CloudManager {
    fn name(&self) -> &str {
        self.state.name()
    }

    async fn initialize(&self) -> Result<()> {
        let section: CloudSection = self.config.section("cloud")?;
        if !KNOWN_PROVIDERS.contains(&section.provider.as_str()) {
            return Err(Error::configuration_key(
                format!("unknown cloud provider '{}'", section.provider),
                "cloud.provider",
            ));
        }
        if section.provider != "none" && section.storage.enabled && section.storage.bucket.is_empty()
        {
            return Err(Error::configuration_key(
                "cloud storage is enabled but no bucket is configured",
                "cloud.storage.bucket",
            ));
        }

        if section.provider == "none" {
            tracing::info!("Cloud manager initialized without a provider");
        } else {
            tracing::info!(
                provider = %section.provider,
                bucket = %section.storage.bucket,
                "Cloud manager initialized"
            );
        }
        *self.section.write() = Some(section);
        self.state.set_ready();
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.section.write().take();
        self.state.set_down();
        Ok(())
    }

    fn status(&self) -> ManagerStatus {
        let details = self
            .section
            .read()
            .as_ref()
            .map(|section| {
                serde_json::json!({
                    "provider": section.provider,
                    "storage_enabled": section.storage.enabled,
                    "bucket": section.storage.bucket,
                })
            })
            .unwrap_or(serde_json::Value::Null);
        self.state.status().with_details(details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_provider_none() {
        let config = Arc::new(ConfigService::new(None));
        config.initialize().await.unwrap();
        let manager = CloudManager::new(config);
        manager.initialize().await.unwrap();
        assert!(!manager.storage_enabled());
    }

    #[tokio::test]
    async fn test_unknown_provider_rejected() {
        let config = Arc::new(ConfigService::new(None));
        config.initialize().await.unwrap();
        config
            .set("cloud.provider", serde_json::json!("oracle"))
            .unwrap();
        let manager = CloudManager::new(config);
        assert!(manager.initialize().await.is_err());
    }

    #[tokio::test]
    async fn test_enabled_storage_requires_bucket() {
        let config = Arc::new(ConfigService::new(None));
        config.initialize().await.unwrap();
        config
            .set("cloud.provider", serde_json::json!("aws"))
            .unwrap();
        config
            .set("cloud.storage.enabled", serde_json::json!(true))
            .unwrap();
        let manager = CloudManager::new(config.clone());
        assert!(manager.initialize().await.is_err());

        config
            .set("cloud.storage.bucket", serde_json::json!("nexus-data"))
            .unwrap();
        manager.initialize().await.unwrap();
        assert!(manager.storage_enabled());
    }
}
