//! Threshold-based alert lifecycle.
//!
//! One active alert exists per metric; its level follows the value
//! (warning at the threshold, critical at 1.25x) while keeping the same
//! alert id. Falling back below the threshold resolves the alert into a
//! bounded history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

/// Cap on the resolved-alert history
const RESOLVED_HISTORY_CAP: usize = 100;
/// Value multiplier above which a warning escalates to critical
const CRITICAL_FACTOR: f64 = 1.25;

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "info" => Some(Self::Info),
            "warning" => Some(Self::Warning),
            "error" => Some(Self::Error),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// A threshold-breach record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub level: AlertLevel,
    pub message: String,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub metric_name: Option<String>,
    pub metric_value: Option<f64>,
    pub threshold: Option<f64>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
}

/// What a threshold check did to the alert book
#[derive(Debug, Clone)]
pub enum AlertTransition {
    /// A new alert was opened
    Raised(Alert),
    /// An existing alert was refreshed or escalated in place
    Updated(Alert),
    /// Active alerts for the metric were resolved
    Resolved(Vec<Alert>),
    /// Nothing changed
    None,
}

/// Book of active and recently resolved alerts
#[derive(Debug, Default)]
pub struct AlertBook {
    active: HashMap<Uuid, Alert>,
    resolved: VecDeque<Alert>,
}

impl AlertBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a metric reading against its threshold
    pub fn check_threshold(
        &mut self,
        metric_name: &str,
        value: f64,
        threshold: f64,
        source: &str,
    ) -> AlertTransition {
        if value >= threshold * CRITICAL_FACTOR {
            self.upsert(metric_name, AlertLevel::Critical, value, threshold, source)
        } else if value >= threshold {
            self.upsert(metric_name, AlertLevel::Warning, value, threshold, source)
        } else {
            let resolved = self.resolve_metric(metric_name);
            if resolved.is_empty() {
                AlertTransition::None
            } else {
                AlertTransition::Resolved(resolved)
            }
        }
    }

    fn upsert(
        &mut self,
        metric_name: &str,
        level: AlertLevel,
        value: f64,
        threshold: f64,
        source: &str,
    ) -> AlertTransition {
        let message = format!(
            "{} is {}: {:.1}%",
            metric_name.replace('_', " "),
            if level == AlertLevel::Critical {
                "critically high"
            } else {
                "high"
            },
            value
        );

        let existing = self
            .active
            .values_mut()
            .find(|alert| alert.metric_name.as_deref() == Some(metric_name));
        if let Some(alert) = existing {
            alert.level = level;
            alert.message = message;
            alert.metric_value = Some(value);
            alert.threshold = Some(threshold);
            alert.timestamp = Utc::now();
            return AlertTransition::Updated(alert.clone());
        }

        let alert = Alert {
            id: Uuid::new_v4(),
            level,
            message,
            source: source.to_string(),
            timestamp: Utc::now(),
            metric_name: Some(metric_name.to_string()),
            metric_value: Some(value),
            threshold: Some(threshold),
            resolved: false,
            resolved_at: None,
            metadata: serde_json::Value::Null,
        };
        self.active.insert(alert.id, alert.clone());
        AlertTransition::Raised(alert)
    }

    /// Resolve every active alert for a metric
    pub fn resolve_metric(&mut self, metric_name: &str) -> Vec<Alert> {
        let ids: Vec<Uuid> = self
            .active
            .values()
            .filter(|a| a.metric_name.as_deref() == Some(metric_name))
            .map(|a| a.id)
            .collect();

        let mut resolved = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(mut alert) = self.active.remove(&id) {
                alert.resolved = true;
                alert.resolved_at = Some(Utc::now());
                self.resolved.push_back(alert.clone());
                if self.resolved.len() > RESOLVED_HISTORY_CAP {
                    self.resolved.pop_front();
                }
                resolved.push(alert);
            }
        }
        resolved
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn resolved_count(&self) -> usize {
        self.resolved.len()
    }

    /// Alerts matching the filters, newest first
    pub fn snapshot(
        &self,
        include_resolved: bool,
        level: Option<AlertLevel>,
        metric_name: Option<&str>,
    ) -> Vec<Alert> {
        let matches = |alert: &Alert| {
            level.map_or(true, |l| alert.level == l)
                && metric_name.map_or(true, |m| alert.metric_name.as_deref() == Some(m))
        };

        let mut result: Vec<Alert> = self.active.values().filter(|a| matches(a)).cloned().collect();
        if include_resolved {
            result.extend(self.resolved.iter().filter(|a| matches(a)).cloned());
        }
        result.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_walk_through_levels() {
        let mut book = AlertBook::new();

        // Below threshold: nothing
        assert!(matches!(
            book.check_threshold("cpu_percent", 70.0, 80.0, "monitor"),
            AlertTransition::None
        ));
        assert_eq!(book.active_count(), 0);

        // Above threshold: warning raised
        let raised = book.check_threshold("cpu_percent", 82.0, 80.0, "monitor");
        let warning_id = match raised {
            AlertTransition::Raised(alert) => {
                assert_eq!(alert.level, AlertLevel::Warning);
                alert.id
            }
            other => panic!("expected Raised, got {other:?}"),
        };
        assert_eq!(book.active_count(), 1);

        // Above 1.25x: same alert escalates to critical
        let escalated = book.check_threshold("cpu_percent", 105.0, 80.0, "monitor");
        match escalated {
            AlertTransition::Updated(alert) => {
                assert_eq!(alert.id, warning_id);
                assert_eq!(alert.level, AlertLevel::Critical);
            }
            other => panic!("expected Updated, got {other:?}"),
        }
        assert_eq!(book.active_count(), 1);

        // Back below: resolved into history
        let resolved = book.check_threshold("cpu_percent", 60.0, 80.0, "monitor");
        match resolved {
            AlertTransition::Resolved(alerts) => {
                assert_eq!(alerts.len(), 1);
                assert_eq!(alerts[0].id, warning_id);
                assert!(alerts[0].resolved);
                assert!(alerts[0].resolved_at.is_some());
            }
            other => panic!("expected Resolved, got {other:?}"),
        }
        assert_eq!(book.active_count(), 0);
        assert_eq!(book.resolved_count(), 1);
        assert_eq!(book.snapshot(true, None, Some("cpu_percent")).len(), 1);
    }

    #[test]
    fn test_repeat_hits_update_in_place() {
        let mut book = AlertBook::new();
        book.check_threshold("memory_percent", 85.0, 80.0, "monitor");
        let first = book.snapshot(false, None, None)[0].clone();

        book.check_threshold("memory_percent", 88.0, 80.0, "monitor");
        let second = book.snapshot(false, None, None)[0].clone();

        assert_eq!(first.id, second.id);
        assert_eq!(second.metric_value, Some(88.0));
        assert_eq!(book.active_count(), 1);
    }

    #[test]
    fn test_resolved_history_is_bounded() {
        let mut book = AlertBook::new();
        for n in 0..130 {
            let metric = format!("metric_{n}");
            book.check_threshold(&metric, 90.0, 80.0, "monitor");
            book.check_threshold(&metric, 10.0, 80.0, "monitor");
        }
        assert_eq!(book.resolved_count(), 100);
    }

    #[test]
    fn test_snapshot_filters() {
        let mut book = AlertBook::new();
        book.check_threshold("cpu_percent", 82.0, 80.0, "monitor");
        book.check_threshold("disk_percent", 120.0, 90.0, "monitor");

        let critical = book.snapshot(false, Some(AlertLevel::Critical), None);
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].metric_name.as_deref(), Some("disk_percent"));

        let cpu = book.snapshot(false, None, Some("cpu_percent"));
        assert_eq!(cpu.len(), 1);
    }
}
