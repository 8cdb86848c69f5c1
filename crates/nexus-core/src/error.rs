//! Unified error types for the Nexus runtime using thiserror.
//!
//! Every component boundary surfaces one of these kinds; panics are
//! reserved for programmer errors.

use std::fmt;
use thiserror::Error;

/// The unified error type for Nexus operations
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String, key: Option<String> },

    // Lifecycle errors
    #[error("Dependency error: {message}")]
    Dependency { message: String },

    #[error("Failed to initialize manager '{manager}': {message}")]
    ManagerInitialization { manager: String, message: String },

    #[error("Failed to shut down manager '{manager}': {message}")]
    ManagerShutdown { manager: String, message: String },

    #[error("Application error: {message}")]
    Application { message: String },

    // Security errors
    #[error("Security error: {message}")]
    Security { message: String },

    #[error("Authentication failed")]
    Authentication,

    #[error("Authorization failed: missing permission {permission}")]
    Authorization { permission: String },

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token: {reason}")]
    InvalidToken { reason: String },

    // API errors
    #[error("API error: {message}")]
    Api { message: String },

    #[error("Rate limit exceeded: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    // Plugin errors
    #[error("Plugin isolation error: {plugin}::{method}: {message}")]
    PluginIsolation {
        plugin: String,
        method: String,
        message: String,
    },

    #[error("Plugin not found: {plugin_id}")]
    PluginNotFound { plugin_id: String },

    // Concurrency errors
    #[error("Concurrency error: {message}")]
    Concurrency { message: String },

    #[error("Task cancelled")]
    TaskCancelled,

    #[error("Operation timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    // Event bus errors
    #[error("Event bus queue is full")]
    EventBusFull,

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("Invalid input: {field} - {message}")]
    InvalidInput { field: String, message: String },

    // Entity errors
    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Duplicate entity: {entity_type} with conflicting {field}")]
    Duplicate { entity_type: String, field: String },

    // Generic wrapped error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Validation errors container
#[derive(Debug, Clone)]
pub struct ValidationErrors {
    pub errors: Vec<ValidationError>,
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.errors.iter().map(|e| e.to_string()).collect();
        write!(f, "{}", messages.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

impl ValidationErrors {
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_result<T>(self, value: T) -> Result<T> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(Error::Validation(self))
        }
    }
}

impl Default for ValidationErrors {
    fn default() -> Self {
        Self::new()
    }
}

/// A single validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl Error {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
            key: None,
        }
    }

    /// Create a configuration error tied to a key
    pub fn configuration_key(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Create a dependency error
    pub fn dependency(message: impl Into<String>) -> Self {
        Error::Dependency {
            message: message.into(),
        }
    }

    /// Create a manager initialization error
    pub fn manager_init(manager: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ManagerInitialization {
            manager: manager.into(),
            message: message.into(),
        }
    }

    /// Create a manager shutdown error
    pub fn manager_shutdown(manager: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ManagerShutdown {
            manager: manager.into(),
            message: message.into(),
        }
    }

    /// Create an application error
    pub fn application(message: impl Into<String>) -> Self {
        Error::Application {
            message: message.into(),
        }
    }

    /// Create a security error
    pub fn security(message: impl Into<String>) -> Self {
        Error::Security {
            message: message.into(),
        }
    }

    /// Create an API error
    pub fn api(message: impl Into<String>) -> Self {
        Error::Api {
            message: message.into(),
        }
    }

    /// Create a plugin isolation error
    pub fn plugin_isolation(
        plugin: impl Into<String>,
        method: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::PluginIsolation {
            plugin: plugin.into(),
            method: method.into(),
            message: message.into(),
        }
    }

    /// Create a concurrency error
    pub fn concurrency(message: impl Into<String>) -> Self {
        Error::Concurrency {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Error::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    /// Create a duplicate entity error
    pub fn duplicate(entity_type: impl Into<String>, field: impl Into<String>) -> Self {
        Error::Duplicate {
            entity_type: entity_type.into(),
            field: field.into(),
        }
    }

    /// Create a validation error from a single message
    pub fn validation(message: impl Into<String>) -> Self {
        let msg = message.into();
        let mut errors = ValidationErrors::new();
        errors.add("validation", &msg);
        Error::Validation(errors)
    }

    /// Create an invalid input error
    pub fn invalid_input(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::InvalidInput {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Get HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::NotFound { .. } | Error::PluginNotFound { .. } => 404,
            Error::Authentication | Error::TokenExpired | Error::InvalidToken { .. } => 401,
            Error::Authorization { .. } => 403,
            Error::Validation(_) | Error::InvalidInput { .. } => 400,
            Error::Duplicate { .. } => 409,
            Error::RateLimited { .. } => 429,
            Error::Timeout { .. } => 504,
            Error::EventBusFull => 503,
            _ => 500,
        }
    }

    /// Get error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Configuration { .. } => "CONFIG_ERROR",
            Error::Dependency { .. } => "DEPENDENCY_ERROR",
            Error::ManagerInitialization { .. } => "MANAGER_INIT_ERROR",
            Error::ManagerShutdown { .. } => "MANAGER_SHUTDOWN_ERROR",
            Error::Application { .. } => "APPLICATION_ERROR",
            Error::Security { .. } => "SECURITY_ERROR",
            Error::Authentication => "AUTH_FAILED",
            Error::Authorization { .. } => "FORBIDDEN",
            Error::TokenExpired => "TOKEN_EXPIRED",
            Error::InvalidToken { .. } => "INVALID_TOKEN",
            Error::Api { .. } => "API_ERROR",
            Error::RateLimited { .. } => "RATE_LIMITED",
            Error::PluginIsolation { .. } => "PLUGIN_ISOLATION_ERROR",
            Error::PluginNotFound { .. } => "PLUGIN_NOT_FOUND",
            Error::Concurrency { .. } => "CONCURRENCY_ERROR",
            Error::TaskCancelled => "TASK_CANCELLED",
            Error::Timeout { .. } => "TIMEOUT",
            Error::EventBusFull => "EVENT_BUS_FULL",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::InvalidInput { .. } => "INVALID_INPUT",
            Error::NotFound { .. } => "NOT_FOUND",
            Error::Duplicate { .. } => "DUPLICATE",
            Error::Other(_) => "UNKNOWN_ERROR",
        }
    }
}

/// Result type alias for Nexus operations
pub type Result<T> = std::result::Result<T, Error>;
