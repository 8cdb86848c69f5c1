//! Resource monitoring manager: periodic sampling loops and the alert
//! lifecycle, feeding the metric registry and the event bus.

use crate::alerts::{Alert, AlertBook, AlertLevel, AlertTransition};
use crate::metrics::MetricRegistry;
use crate::sampler::{SystemSampler, SystemSample};
use async_trait::async_trait;
use nexus_concurrency::ConcurrencyManager;
use nexus_config::schema::MonitoringSection;
use nexus_config::{ConfigService, ListenerId};
use nexus_core::error::Result;
use nexus_core::manager::{Manager, ManagerState, ManagerStatus};
use nexus_events::{handler, topics, EventBus};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

const SOURCE: &str = "monitoring_manager";
/// Backoff after a failed collection pass
const ERROR_BACKOFF: Duration = Duration::from_secs(5);
/// Uptime gauge refresh period
const UPTIME_INTERVAL: Duration = Duration::from_secs(60);

struct MonitorCore {
    config: Arc<ConfigService>,
    bus: Arc<EventBus>,
    concurrency: Arc<ConcurrencyManager>,
    sampler: Arc<SystemSampler>,
    alerts: Mutex<AlertBook>,
    thresholds: RwLock<HashMap<String, f64>>,
    interval_secs: AtomicU64,
    registry: MetricRegistry,
    running: AtomicBool,
    stop: Notify,
    started_at: Instant,
}

impl MonitorCore {
    /// Sleep for `duration` unless shutdown is signalled first
    async fn pause(&self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.stop.notified() => {}
        }
    }

    async fn collect_system_metrics(&self) -> Result<SystemSample> {
        let sampler = self.sampler.clone();
        let sample = self.concurrency.run_io(move |_| sampler.sample())?.await?;

        let _ = self
            .registry
            .set_gauge("system_cpu_percent", &[], sample.cpu_percent);
        let _ = self
            .registry
            .set_gauge("system_memory_percent", &[], sample.memory_percent);
        if let Some(disk) = sample.disk_percent {
            let _ = self.registry.set_gauge("system_disk_percent", &[], disk);
        }

        self.ingest_metric("cpu_percent", sample.cpu_percent);
        self.ingest_metric("memory_percent", sample.memory_percent);
        if let Some(disk) = sample.disk_percent {
            self.ingest_metric("disk_percent", disk);
        }

        if let Err(e) = self.bus.publish(
            topics::MONITORING_METRICS,
            SOURCE,
            serde_json::json!({
                "cpu_percent": sample.cpu_percent,
                "memory_percent": sample.memory_percent,
                "disk_percent": sample.disk_percent,
            }),
        ) {
            tracing::debug!(error = %e, "Could not publish metrics event");
        }
        Ok(sample)
    }

    /// Run a metric reading through the alert state machine
    fn ingest_metric(&self, metric_name: &str, value: f64) {
        let threshold = match self.thresholds.read().get(metric_name) {
            Some(t) => *t,
            None => return,
        };

        let transition =
            self.alerts
                .lock()
                .check_threshold(metric_name, value, threshold, SOURCE);
        match transition {
            AlertTransition::Raised(alert) | AlertTransition::Updated(alert) => {
                match alert.level {
                    AlertLevel::Critical | AlertLevel::Error => {
                        tracing::error!(metric = metric_name, value, threshold, "Alert: {}", alert.message);
                    }
                    _ => {
                        tracing::warn!(metric = metric_name, value, threshold, "Alert: {}", alert.message);
                    }
                }
                if let Err(e) = self.bus.publish(
                    topics::MONITORING_ALERT,
                    SOURCE,
                    serde_json::json!({
                        "alert_id": alert.id,
                        "level": alert.level.as_str(),
                        "message": alert.message,
                        "metric_name": alert.metric_name,
                        "metric_value": alert.metric_value,
                        "threshold": alert.threshold,
                    }),
                ) {
                    tracing::debug!(error = %e, "Could not publish alert event");
                }
            }
            AlertTransition::Resolved(alerts) => {
                for alert in alerts {
                    tracing::info!(metric = metric_name, "Resolved alert {}", alert.id);
                    if let Err(e) = self.bus.publish(
                        topics::MONITORING_ALERT_RESOLVED,
                        SOURCE,
                        serde_json::json!({
                            "alert_id": alert.id,
                            "metric_name": alert.metric_name,
                            "resolved_at": alert.resolved_at,
                        }),
                    ) {
                        tracing::debug!(error = %e, "Could not publish alert-resolved event");
                    }
                }
            }
            AlertTransition::None => {}
        }
    }

    async fn system_metrics_loop(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            match self.collect_system_metrics().await {
                Ok(_) => {
                    let interval = self.interval_secs.load(Ordering::SeqCst);
                    self.pause(Duration::from_secs(interval.max(1))).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "System metrics collection failed");
                    self.pause(ERROR_BACKOFF).await;
                }
            }
        }
    }

    async fn uptime_loop(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            let uptime = self.started_at.elapsed().as_secs_f64();
            let _ = self.registry.set_gauge("app_uptime_seconds", &[], uptime);
            self.pause(UPTIME_INTERVAL).await;
        }
    }
}

/// Resource monitor manager
pub struct ResourceMonitor {
    state: ManagerState,
    core: Arc<MonitorCore>,
    enabled: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    listener_id: Mutex<Option<ListenerId>>,
}

impl ResourceMonitor {
    pub fn new(
        config: Arc<ConfigService>,
        bus: Arc<EventBus>,
        concurrency: Arc<ConcurrencyManager>,
    ) -> Arc<Self> {
        let mut thresholds = HashMap::new();
        thresholds.insert("cpu_percent".to_string(), 80.0);
        thresholds.insert("memory_percent".to_string(), 80.0);
        thresholds.insert("disk_percent".to_string(), 90.0);

        Arc::new(Self {
            state: ManagerState::new("resource_monitoring_manager"),
            core: Arc::new(MonitorCore {
                config,
                bus,
                concurrency,
                sampler: Arc::new(SystemSampler::new()),
                alerts: Mutex::new(AlertBook::new()),
                thresholds: RwLock::new(thresholds),
                interval_secs: AtomicU64::new(10),
                registry: MetricRegistry::new(),
                running: AtomicBool::new(false),
                stop: Notify::new(),
                started_at: Instant::now(),
            }),
            enabled: AtomicBool::new(true),
            tasks: Mutex::new(Vec::new()),
            listener_id: Mutex::new(None),
        })
    }

    /// The metric registry (register gauges/counters/histograms/summaries)
    pub fn registry(&self) -> &MetricRegistry {
        &self.core.registry
    }

    /// Feed a metric reading through the alert state machine
    pub fn ingest_metric(&self, metric_name: &str, value: f64) {
        self.core.ingest_metric(metric_name, value);
    }

    /// Alerts matching the filters, newest first
    pub fn get_alerts(
        &self,
        include_resolved: bool,
        level: Option<AlertLevel>,
        metric_name: Option<&str>,
    ) -> Vec<Alert> {
        self.core
            .alerts
            .lock()
            .snapshot(include_resolved, level, metric_name)
    }

    /// Point-in-time diagnostic report
    pub async fn diagnostics(&self) -> Result<serde_json::Value> {
        let sampler = self.core.sampler.clone();
        let sample = self
            .core
            .concurrency
            .run_io(move |_| sampler.sample())?
            .await?;
        let alerts = self.core.alerts.lock();
        Ok(serde_json::json!({
            "timestamp": chrono::Utc::now(),
            "system": {
                "cpu_percent": sample.cpu_percent,
                "memory_percent": sample.memory_percent,
                "disk_percent": sample.disk_percent,
                "memory_total": sample.memory_total,
                "memory_used": sample.memory_used,
            },
            "process": {
                "pid": std::process::id(),
                "uptime_seconds": self.core.started_at.elapsed().as_secs(),
            },
            "alerts": {
                "active": alerts.active_count(),
                "resolved": alerts.resolved_count(),
            },
            "metrics_registered": self.core.registry.metric_count(),
        }))
    }
}

#[async_trait]
impl Manager for ResourceMonitor {
    fn name(&self) -> &str {
        self.state.name()
    }

    async fn initialize(&self) -> Result<()> {
        let section: MonitoringSection = self.core.config.section("monitoring")?;

        {
            let mut thresholds = self.core.thresholds.write();
            thresholds.insert(
                "cpu_percent".to_string(),
                section.alert_thresholds.cpu_percent,
            );
            thresholds.insert(
                "memory_percent".to_string(),
                section.alert_thresholds.memory_percent,
            );
            thresholds.insert(
                "disk_percent".to_string(),
                section.alert_thresholds.disk_percent,
            );
        }
        self.core
            .interval_secs
            .store(section.metrics_interval_seconds.max(1), Ordering::SeqCst);

        if !section.enabled {
            self.enabled.store(false, Ordering::SeqCst);
            self.state.set_ready();
            tracing::info!("Resource monitoring is disabled in configuration");
            return Ok(());
        }

        let registry = &self.core.registry;
        registry.register_gauge("system_cpu_percent", "System CPU usage percentage", &[])?;
        registry.register_gauge(
            "system_memory_percent",
            "System memory usage percentage",
            &[],
        )?;
        registry.register_gauge("system_disk_percent", "System disk usage percentage", &[])?;
        registry.register_gauge("app_uptime_seconds", "Application uptime in seconds", &[])?;
        registry.register_counter(
            "events_total",
            "Total number of events processed",
            &["event_type", "source"],
        )?;

        // Count every event crossing the bus
        let counting_core = self.core.clone();
        self.core.bus.subscribe(
            "*",
            SOURCE,
            handler(move |event| {
                let core = counting_core.clone();
                async move {
                    let _ = core.registry.inc_counter(
                        "events_total",
                        &[&event.event_type, &event.source],
                        1.0,
                    );
                    Ok(())
                }
            }),
        )?;

        // Live updates for thresholds and the sampling interval
        let listener_core = self.core.clone();
        let listener_id = self.core.config.register_listener(
            "monitoring",
            Arc::new(move |key: &str, value: &serde_json::Value| {
                if let Some(name) = key.strip_prefix("monitoring.alert_thresholds.") {
                    if let Some(threshold) = value.as_f64() {
                        listener_core
                            .thresholds
                            .write()
                            .insert(name.to_string(), threshold);
                        tracing::info!(threshold = name, value = threshold, "Updated alert threshold");
                    }
                } else if key == "monitoring.metrics_interval_seconds" {
                    if let Some(interval) = value.as_u64() {
                        listener_core
                            .interval_secs
                            .store(interval.max(1), Ordering::SeqCst);
                        listener_core.stop.notify_waiters();
                        tracing::info!(interval, "Updated metrics interval");
                    }
                }
            }),
        );
        *self.listener_id.lock() = Some(listener_id);

        self.core.running.store(true, Ordering::SeqCst);
        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(self.core.clone().system_metrics_loop()));
        tasks.push(tokio::spawn(self.core.clone().uptime_loop()));
        drop(tasks);

        self.state.set_ready();
        tracing::info!(
            interval = section.metrics_interval_seconds,
            "Resource monitoring manager initialized"
        );
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        if !self.state.initialized() {
            return Ok(());
        }
        self.core.running.store(false, Ordering::SeqCst);
        self.core.stop.notify_waiters();

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if tokio::time::timeout(Duration::from_secs(5), task).await.is_err() {
                tracing::warn!("Monitoring loop did not stop in time");
            }
        }

        if self.enabled.load(Ordering::SeqCst) {
            self.core.bus.unsubscribe(SOURCE);
        }
        if let Some(id) = self.listener_id.lock().take() {
            self.core.config.unregister_listener(id);
        }
        self.state.set_down();
        Ok(())
    }

    fn status(&self) -> ManagerStatus {
        let alerts = self.core.alerts.lock();
        self.state.status().with_details(serde_json::json!({
            "enabled": self.enabled.load(Ordering::SeqCst),
            "interval_seconds": self.core.interval_secs.load(Ordering::SeqCst),
            "active_alerts": alerts.active_count(),
            "resolved_alerts": alerts.resolved_count(),
            "metrics_registered": self.core.registry.metric_count(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_concurrency::main_dispatcher;

    async fn test_stack(monitoring_enabled: bool) -> (Arc<ResourceMonitor>, Arc<EventBus>) {
        let config = Arc::new(ConfigService::new(None));
        config.initialize().await.unwrap();
        config
            .set(
                "monitoring.enabled",
                serde_json::json!(monitoring_enabled),
            )
            .unwrap();

        let bus = EventBus::new(config.clone());
        bus.initialize().await.unwrap();

        let (dispatcher, _main_loop) = main_dispatcher();
        let concurrency = ConcurrencyManager::new(config.clone(), dispatcher);
        concurrency.initialize().await.unwrap();

        let monitor = ResourceMonitor::new(config, bus.clone(), concurrency);
        monitor.initialize().await.unwrap();
        (monitor, bus)
    }

    #[tokio::test]
    async fn test_alert_threshold_scenario() {
        // Loops disabled so only the fed readings drive the state machine
        let (monitor, _bus) = test_stack(false).await;

        monitor.ingest_metric("cpu_percent", 70.0);
        assert!(monitor.get_alerts(false, None, None).is_empty());

        monitor.ingest_metric("cpu_percent", 82.0);
        let alerts = monitor.get_alerts(false, None, Some("cpu_percent"));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, AlertLevel::Warning);
        let alert_id = alerts[0].id;

        monitor.ingest_metric("cpu_percent", 105.0);
        let alerts = monitor.get_alerts(false, None, Some("cpu_percent"));
        assert_eq!(alerts.len(), 1, "escalation must not open a second alert");
        assert_eq!(alerts[0].id, alert_id);
        assert_eq!(alerts[0].level, AlertLevel::Critical);

        monitor.ingest_metric("cpu_percent", 60.0);
        assert!(monitor.get_alerts(false, None, Some("cpu_percent")).is_empty());
        let history = monitor.get_alerts(true, None, Some("cpu_percent"));
        assert_eq!(history.len(), 1);
        assert!(history[0].resolved);
    }

    #[tokio::test]
    async fn test_alert_events_published() {
        let (monitor, bus) = test_stack(false).await;

        let raised = Arc::new(AtomicBool::new(false));
        let resolved = Arc::new(AtomicBool::new(false));
        let raised_cb = raised.clone();
        bus.subscribe(
            topics::MONITORING_ALERT,
            "test-observer",
            handler(move |_| {
                let flag = raised_cb.clone();
                async move {
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                }
            }),
        )
        .unwrap();
        let resolved_cb = resolved.clone();
        bus.subscribe(
            topics::MONITORING_ALERT_RESOLVED,
            "test-observer",
            handler(move |_| {
                let flag = resolved_cb.clone();
                async move {
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                }
            }),
        )
        .unwrap();

        monitor.ingest_metric("memory_percent", 95.0);
        monitor.ingest_metric("memory_percent", 10.0);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(raised.load(Ordering::SeqCst));
        assert!(resolved.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_loops_populate_gauges() {
        let (monitor, _bus) = test_stack(true).await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(monitor
            .registry()
            .gauge_value("system_cpu_percent", &[])
            .is_some());
        assert!(monitor
            .registry()
            .gauge_value("app_uptime_seconds", &[])
            .is_some());
        monitor.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_threshold_config_update() {
        let (monitor, _bus) = test_stack(true).await;

        monitor
            .core
            .config
            .set(
                "monitoring.alert_thresholds.cpu_percent",
                serde_json::json!(50.0),
            )
            .unwrap();
        assert_eq!(
            monitor.core.thresholds.read().get("cpu_percent"),
            Some(&50.0)
        );
        monitor.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_diagnostics_report() {
        let (monitor, _bus) = test_stack(false).await;
        let report = monitor.diagnostics().await.unwrap();
        assert!(report["system"]["cpu_percent"].is_number());
        assert!(report["process"]["pid"].is_number());
    }
}
