//! Configuration schema for the Nexus runtime.
//!
//! Every section has explicit defaults; a configuration tree validates by
//! deserializing into these structs plus the cross-section rules in
//! [`ConfigSchema::validate`].

use nexus_core::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Root schema covering all recognized sections
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigSchema {
    pub app: AppSection,
    pub database: DatabaseSection,
    pub logging: LoggingSection,
    pub event_bus: EventBusSection,
    pub thread_pool: ThreadPoolSection,
    pub api: ApiSection,
    pub security: SecuritySection,
    pub plugins: PluginsSection,
    pub files: FilesSection,
    pub monitoring: MonitoringSection,
    pub cloud: CloudSection,
}

impl ConfigSchema {
    /// Cross-section validation rules
    pub fn validate(&self) -> Result<()> {
        if self.api.enabled && self.security.jwt.secret.is_empty() {
            return Err(Error::configuration_key(
                "JWT secret must be set when the API is enabled",
                "security.jwt.secret",
            ));
        }
        Ok(())
    }
}

/// Application identity and UI toggles
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    pub version: String,
    pub environment: String,
    pub debug: bool,
    pub ui: UiSection,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "Nexus".to_string(),
            version: "0.3.1".to_string(),
            environment: "development".to_string(),
            debug: false,
            ui: UiSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiSection {
    pub enabled: bool,
    pub theme: String,
    pub language: String,
}

impl Default for UiSection {
    fn default() -> Self {
        Self {
            enabled: true,
            theme: "light".to_string(),
            language: "en".to_string(),
        }
    }
}

/// Persistence adapter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    #[serde(rename = "type")]
    pub db_type: String,
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    pub pool_size: u32,
    pub max_overflow: u32,
    pub echo: bool,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            db_type: "memory".to_string(),
            host: "localhost".to_string(),
            port: 5432,
            name: "nexus".to_string(),
            user: "nexus".to_string(),
            password: String::new(),
            pool_size: 5,
            max_overflow: 10,
            echo: false,
        }
    }
}

/// Logging sinks and levels
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub format: String,
    pub file: LogFileSection,
    pub console: LogConsoleSection,
    pub database: LogDatabaseSection,
    pub elk: ElkSection,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            file: LogFileSection::default(),
            console: LogConsoleSection::default(),
            database: LogDatabaseSection::default(),
            elk: ElkSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogFileSection {
    pub enabled: bool,
    pub path: String,
    pub rotation: String,
    pub retention: String,
}

impl Default for LogFileSection {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "logs/nexus.log".to_string(),
            rotation: "daily".to_string(),
            retention: "30 days".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConsoleSection {
    pub enabled: bool,
    pub level: String,
}

impl Default for LogConsoleSection {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogDatabaseSection {
    pub enabled: bool,
    pub level: String,
}

impl Default for LogDatabaseSection {
    fn default() -> Self {
        Self {
            enabled: false,
            level: "warn".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElkSection {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub index: String,
}

impl Default for ElkSection {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "localhost".to_string(),
            port: 9200,
            index: "nexus".to_string(),
        }
    }
}

/// Event bus sizing and optional external bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusSection {
    pub thread_pool_size: usize,
    pub max_queue_size: usize,
    pub publish_timeout: f64,
    pub external: ExternalBusSection,
}

impl Default for EventBusSection {
    fn default() -> Self {
        Self {
            thread_pool_size: 4,
            max_queue_size: 1000,
            publish_timeout: 5.0,
            external: ExternalBusSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalBusSection {
    pub enabled: bool,
    #[serde(rename = "type")]
    pub bus_type: String,
    pub host: String,
    pub port: u16,
    pub exchange: String,
    pub queue: String,
}

impl Default for ExternalBusSection {
    fn default() -> Self {
        Self {
            enabled: false,
            bus_type: "rabbitmq".to_string(),
            host: "localhost".to_string(),
            port: 5672,
            exchange: "nexus_events".to_string(),
            queue: "nexus_queue".to_string(),
        }
    }
}

/// Concurrency facility sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadPoolSection {
    pub worker_threads: usize,
    pub io_threads: usize,
    pub process_workers: usize,
    pub enable_process_pool: bool,
    pub thread_name_prefix: String,
}

impl Default for ThreadPoolSection {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            io_threads: 8,
            process_workers: 2,
            enable_process_pool: true,
            thread_name_prefix: "nexus-worker".to_string(),
        }
    }
}

/// HTTP surface
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub cors: CorsSection,
    pub rate_limit: RateLimitSection,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".to_string(),
            port: 8000,
            workers: 4,
            cors: CorsSection::default(),
            rate_limit: RateLimitSection::default(),
        }
    }
}

impl ApiSection {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsSection {
    pub origins: Vec<String>,
    pub methods: Vec<String>,
    pub headers: Vec<String>,
}

impl Default for CorsSection {
    fn default() -> Self {
        Self {
            origins: vec!["*".to_string()],
            methods: vec!["*".to_string()],
            headers: vec!["*".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    pub enabled: bool,
    pub requests_per_minute: u32,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: 100,
        }
    }
}

/// Authentication and password policy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySection {
    pub jwt: JwtSection,
    pub password_policy: PasswordPolicySection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtSection {
    pub secret: String,
    pub algorithm: String,
    pub access_token_expire_minutes: i64,
    pub refresh_token_expire_days: i64,
    /// Issue a fresh refresh token on each refresh instead of reusing
    pub rotate_refresh: bool,
}

impl Default for JwtSection {
    fn default() -> Self {
        Self {
            secret: "change-me-in-production".to_string(),
            algorithm: "HS256".to_string(),
            access_token_expire_minutes: 30,
            refresh_token_expire_days: 7,
            rotate_refresh: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordPolicySection {
    pub min_length: usize,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_digit: bool,
    pub require_special: bool,
    pub special_chars: String,
}

impl Default for PasswordPolicySection {
    fn default() -> Self {
        Self {
            min_length: 8,
            require_uppercase: true,
            require_lowercase: true,
            require_digit: true,
            require_special: true,
            special_chars: "!@#$%^&*()_-+={}[]\\|:;\"'<>,.?/".to_string(),
        }
    }
}

/// Plugin loader settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsSection {
    pub directory: String,
    pub autoload: bool,
    pub enabled: Vec<String>,
    pub disabled: Vec<String>,
    pub isolation: IsolationSection,
}

impl Default for PluginsSection {
    fn default() -> Self {
        Self {
            directory: "plugins".to_string(),
            autoload: true,
            enabled: Vec::new(),
            disabled: Vec::new(),
            isolation: IsolationSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolationSection {
    pub default_level: String,
}

impl Default for IsolationSection {
    fn default() -> Self {
        Self {
            default_level: "thread".to_string(),
        }
    }
}

/// Filesystem roots
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesSection {
    pub base_directory: String,
    pub temp_directory: String,
    pub plugin_data_directory: String,
    pub backup_directory: String,
}

impl Default for FilesSection {
    fn default() -> Self {
        Self {
            base_directory: "data".to_string(),
            temp_directory: "data/temp".to_string(),
            plugin_data_directory: "data/plugins".to_string(),
            backup_directory: "data/backups".to_string(),
        }
    }
}

/// Metrics and alerting
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringSection {
    pub enabled: bool,
    pub prometheus: PrometheusSection,
    pub alert_thresholds: AlertThresholdsSection,
    pub metrics_interval_seconds: u64,
}

impl Default for MonitoringSection {
    fn default() -> Self {
        Self {
            enabled: true,
            prometheus: PrometheusSection::default(),
            alert_thresholds: AlertThresholdsSection::default(),
            metrics_interval_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrometheusSection {
    pub enabled: bool,
    pub port: u16,
}

impl Default for PrometheusSection {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9090,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholdsSection {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
}

impl Default for AlertThresholdsSection {
    fn default() -> Self {
        Self {
            cpu_percent: 80.0,
            memory_percent: 80.0,
            disk_percent: 90.0,
        }
    }
}

/// Optional cloud blob backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudSection {
    pub provider: String,
    pub storage: CloudStorageSection,
}

impl Default for CloudSection {
    fn default() -> Self {
        Self {
            provider: "none".to_string(),
            storage: CloudStorageSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudStorageSection {
    pub enabled: bool,
    #[serde(rename = "type")]
    pub storage_type: String,
    pub bucket: String,
    pub prefix: String,
}

impl Default for CloudStorageSection {
    fn default() -> Self {
        Self {
            enabled: false,
            storage_type: "local".to_string(),
            bucket: String::new(),
            prefix: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let schema = ConfigSchema::default();
        schema.validate().unwrap();
        assert_eq!(schema.api.port, 8000);
        assert_eq!(schema.monitoring.alert_thresholds.cpu_percent, 80.0);
        assert_eq!(schema.thread_pool.io_threads, 8);
    }

    #[test]
    fn test_empty_secret_rejected_when_api_enabled() {
        let mut schema = ConfigSchema::default();
        schema.security.jwt.secret = String::new();
        assert!(schema.validate().is_err());

        // With the API disabled an empty secret is allowed
        schema.api.enabled = false;
        schema.validate().unwrap();
    }

    #[test]
    fn test_partial_tree_deserializes_with_defaults() {
        let tree = serde_json::json!({
            "app": {"name": "Custom"},
            "api": {"port": 9000}
        });
        let schema: ConfigSchema = serde_json::from_value(tree).unwrap();
        assert_eq!(schema.app.name, "Custom");
        assert_eq!(schema.app.environment, "development");
        assert_eq!(schema.api.port, 9000);
    }

    #[test]
    fn test_non_integer_port_rejected() {
        let tree = serde_json::json!({"api": {"port": "not-a-port"}});
        assert!(serde_json::from_value::<ConfigSchema>(tree).is_err());
    }
}
