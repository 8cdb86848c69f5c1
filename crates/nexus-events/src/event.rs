//! Event type carried by the bus. Events are immutable after publish and
//! shared between subscribers behind an `Arc`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A published event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: Uuid,
    /// Topic, e.g. `security/user_login`
    pub event_type: String,
    /// Identifier of the publishing component
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(
        event_type: impl Into<String>,
        source: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            source: source.into(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// Well-known topics published by the runtime
pub mod topics {
    pub const SYSTEM_STARTED: &str = "system/started";
    pub const SYSTEM_SHUTTING_DOWN: &str = "system/shutting_down";

    pub const SECURITY_USER_CREATED: &str = "security/user_created";
    pub const SECURITY_USER_UPDATED: &str = "security/user_updated";
    pub const SECURITY_USER_DELETED: &str = "security/user_deleted";
    pub const SECURITY_USER_LOGIN: &str = "security/user_login";
    pub const SECURITY_TOKEN_REVOKED: &str = "security/token_revoked";

    pub const MONITORING_METRICS: &str = "monitoring/metrics";
    pub const MONITORING_ALERT: &str = "monitoring/alert";
    pub const MONITORING_ALERT_RESOLVED: &str = "monitoring/alert_resolved";

    pub const PLUGIN_LOADED: &str = "plugins/loaded";
    pub const PLUGIN_UNLOADED: &str = "plugins/unloaded";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_stamps_id_and_time() {
        let a = Event::new("test/topic", "tester", serde_json::json!({"k": 1}));
        let b = Event::new("test/topic", "tester", serde_json::json!({"k": 2}));
        assert_ne!(a.event_id, b.event_id);
        assert_eq!(a.event_type, "test/topic");
        assert_eq!(a.source, "tester");
    }

    #[test]
    fn test_event_serializes() {
        let event = Event::new("x/y", "src", serde_json::json!({"n": 3}));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "x/y");
        assert_eq!(json["payload"]["n"], 3);
    }
}
