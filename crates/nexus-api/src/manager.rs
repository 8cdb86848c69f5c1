//! API manager: owns the HTTP server lifecycle.

use crate::routes::router;
use crate::state::ApiState;
use async_trait::async_trait;
use nexus_config::schema::ApiSection;
use nexus_core::error::{Error, Result};
use nexus_core::manager::{Manager, ManagerState, ManagerStatus};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Manager serving the REST surface when `api.enabled` is set
pub struct ApiManager {
    state: ManagerState,
    api_state: ApiState,
    server: Mutex<Option<JoinHandle<()>>>,
    bound_addr: Mutex<Option<std::net::SocketAddr>>,
    shutdown: Arc<Notify>,
    enabled: std::sync::atomic::AtomicBool,
}

impl ApiManager {
    pub fn new(api_state: ApiState) -> Arc<Self> {
        Arc::new(Self {
            state: ManagerState::new("api_manager"),
            api_state,
            server: Mutex::new(None),
            bound_addr: Mutex::new(None),
            shutdown: Arc::new(Notify::new()),
            enabled: std::sync::atomic::AtomicBool::new(false),
        })
    }

    /// The address actually bound (useful when the port was 0)
    pub fn bound_addr(&self) -> Option<std::net::SocketAddr> {
        *self.bound_addr.lock()
    }
}

#[async_trait]
impl Manager for ApiManager {
    fn name(&self) -> &str {
        self.state.name()
    }

    async fn initialize(&self) -> Result<()> {
        let section: ApiSection = self.api_state.config.section("api")?;
        if !section.enabled {
            self.state.set_ready();
            tracing::info!("API is disabled in configuration");
            return Ok(());
        }
        self.enabled
            .store(true, std::sync::atomic::Ordering::SeqCst);

        // App identity comes from the live configuration
        let mut api_state = self.api_state.clone();
        if let Some(name) = api_state.config.get("app.name").and_then(|v| {
            v.as_str().map(String::from)
        }) {
            api_state.app_name = name;
        }
        if let Some(version) = api_state.config.get("app.version").and_then(|v| {
            v.as_str().map(String::from)
        }) {
            api_state.app_version = version;
        }

        let app = router(api_state, &section);
        let listener = tokio::net::TcpListener::bind(section.address())
            .await
            .map_err(|e| Error::api(format!("cannot bind {}: {e}", section.address())))?;
        let addr = listener
            .local_addr()
            .map_err(|e| Error::api(format!("cannot read bound address: {e}")))?;
        *self.bound_addr.lock() = Some(addr);

        let shutdown = self.shutdown.clone();
        let server = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.notified().await })
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "API server exited with error");
            }
        });
        *self.server.lock() = Some(server);

        self.state.set_ready();
        tracing::info!(%addr, "API server listening");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        if !self.state.initialized() {
            return Ok(());
        }
        self.shutdown.notify_waiters();
        let server = self.server.lock().take();
        if let Some(server) = server {
            if tokio::time::timeout(std::time::Duration::from_secs(5), server)
                .await
                .is_err()
            {
                tracing::warn!("API server did not stop in time");
            }
        }
        *self.bound_addr.lock() = None;
        self.state.set_down();
        Ok(())
    }

    fn status(&self) -> ManagerStatus {
        self.state.status().with_details(serde_json::json!({
            "enabled": self.enabled.load(std::sync::atomic::Ordering::SeqCst),
            "address": self.bound_addr().map(|a| a.to_string()),
        }))
    }
}
