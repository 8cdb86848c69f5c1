//! Shared persisted-state model types.
//!
//! These are the shapes the storage adapter persists; whether they land in
//! memory or in a database is the adapter's concern.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A system setting stored under a dotted key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSetting {
    /// Dotted configuration-style key, e.g. `app.ui.theme`
    pub key: String,
    /// Arbitrary JSON value
    pub value: serde_json::Value,
    /// Secret values are redacted from API reads
    pub is_secret: bool,
    /// Non-editable settings reject writes through the API
    pub is_editable: bool,
    pub updated_at: DateTime<Utc>,
}

impl SystemSetting {
    pub fn new(key: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            key: key.into(),
            value,
            is_secret: false,
            is_editable: true,
            updated_at: Utc::now(),
        }
    }

    pub fn secret(mut self) -> Self {
        self.is_secret = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.is_editable = false;
        self
    }
}

/// The kind of action an audit record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Create,
    Read,
    Update,
    Delete,
    Login,
    Logout,
    Export,
    Import,
    Config,
    System,
    Plugin,
    Custom,
}

/// A single audit trail record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub user_id: Option<Uuid>,
    pub user_name: Option<String>,
    pub action_type: AuditAction,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub description: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub details: serde_json::Value,
}

impl AuditLog {
    pub fn new(action_type: AuditAction, resource_type: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            user_id: None,
            user_name: None,
            action_type,
            resource_type: resource_type.into(),
            resource_id: None,
            description: None,
            ip_address: None,
            user_agent: None,
            details: serde_json::Value::Null,
        }
    }

    pub fn with_user(mut self, user_id: Uuid, user_name: impl Into<String>) -> Self {
        self.user_id = Some(user_id);
        self.user_name = Some(user_name.into());
        self
    }

    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setting_builders() {
        let setting = SystemSetting::new("security.jwt.secret", serde_json::json!("s3cret"))
            .secret()
            .read_only();
        assert!(setting.is_secret);
        assert!(!setting.is_editable);
    }

    #[test]
    fn test_audit_action_serialization() {
        let json = serde_json::to_string(&AuditAction::Login).unwrap();
        assert_eq!(json, "\"login\"");
        let back: AuditAction = serde_json::from_str("\"plugin\"").unwrap();
        assert_eq!(back, AuditAction::Plugin);
    }

    #[test]
    fn test_audit_log_builder() {
        let entry = AuditLog::new(AuditAction::Update, "user")
            .with_user(Uuid::new_v4(), "admin")
            .with_resource_id("42")
            .with_description("role change");
        assert_eq!(entry.resource_type, "user");
        assert_eq!(entry.user_name.as_deref(), Some("admin"));
        assert_eq!(entry.resource_id.as_deref(), Some("42"));
    }
}
