//! Subscription patterns.
//!
//! Supported grammar: an exact topic, the total wildcard `*`, or a
//! trailing-segment glob such as `security/*`. Mid-pattern wildcards are
//! not supported.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventPattern {
    /// Matches every event type
    All,
    /// Matches one exact topic
    Exact(String),
    /// Matches any topic under the prefix, e.g. `security/*`
    Prefix(String),
}

impl EventPattern {
    pub fn parse(pattern: &str) -> Self {
        if pattern == "*" {
            return Self::All;
        }
        if let Some(prefix) = pattern.strip_suffix("/*") {
            return Self::Prefix(format!("{prefix}/"));
        }
        Self::Exact(pattern.to_string())
    }

    pub fn matches(&self, event_type: &str) -> bool {
        match self {
            Self::All => true,
            Self::Exact(topic) => topic == event_type,
            Self::Prefix(prefix) => event_type.starts_with(prefix.as_str()),
        }
    }

    /// Canonical string form, usable as a map key
    pub fn as_string(&self) -> String {
        match self {
            Self::All => "*".to_string(),
            Self::Exact(topic) => topic.clone(),
            Self::Prefix(prefix) => format!("{prefix}*"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_wildcard() {
        let pattern = EventPattern::parse("*");
        assert!(pattern.matches("anything"));
        assert!(pattern.matches("security/user_login"));
    }

    #[test]
    fn test_exact_match() {
        let pattern = EventPattern::parse("system/started");
        assert!(pattern.matches("system/started"));
        assert!(!pattern.matches("system/shutting_down"));
        assert!(!pattern.matches("system/started/extra"));
    }

    #[test]
    fn test_prefix_glob() {
        let pattern = EventPattern::parse("security/*");
        assert!(pattern.matches("security/user_login"));
        assert!(pattern.matches("security/token_revoked"));
        assert!(!pattern.matches("security"));
        assert!(!pattern.matches("monitoring/alert"));
    }

    #[test]
    fn test_round_trip_string() {
        for raw in ["*", "a/b", "security/*"] {
            assert_eq!(EventPattern::parse(raw).as_string(), raw);
        }
    }
}
