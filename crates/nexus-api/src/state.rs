//! Shared state handed to every handler.

use nexus_config::ConfigService;
use nexus_core::registry::ManagerRegistry;
use nexus_monitor::ResourceMonitor;
use nexus_plugins::PluginManager;
use nexus_security::SecurityManager;
use std::sync::Arc;

/// Everything the REST handlers reach into.
///
/// Handlers are thin adapters: each one validates input, checks the
/// route's required permission, and delegates to a manager.
#[derive(Clone)]
pub struct ApiState {
    pub config: Arc<ConfigService>,
    pub security: Arc<SecurityManager>,
    pub monitor: Arc<ResourceMonitor>,
    pub plugins: Arc<PluginManager>,
    pub registry: Arc<ManagerRegistry>,
    pub app_name: String,
    pub app_version: String,
}

/// Per-route required permissions. Data, not code: the authorization
/// middleware reads these, handlers never hard-code checks.
pub mod route_permissions {
    pub const SYSTEM_VIEW: &str = "system.view";
    pub const SYSTEM_MANAGE: &str = "system.manage";
    pub const USERS_VIEW: &str = "users.view";
    pub const USERS_MANAGE: &str = "users.manage";
    pub const PLUGINS_VIEW: &str = "plugins.view";
    pub const PLUGINS_MANAGE: &str = "plugins.manage";
}
