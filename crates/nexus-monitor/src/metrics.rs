//! Metric registry: gauges, counters, histograms, and summaries by name,
//! with optional label sets and Prometheus text exposition.

use nexus_core::error::{Error, Result};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::Arc;

/// Default histogram buckets (seconds-flavored, same shape Prometheus uses)
const DEFAULT_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Gauge,
    Counter,
    Histogram,
    Summary,
}

impl MetricKind {
    fn prometheus_type(&self) -> &'static str {
        match self {
            Self::Gauge => "gauge",
            Self::Counter => "counter",
            Self::Histogram => "histogram",
            Self::Summary => "summary",
        }
    }
}

#[derive(Debug, Clone)]
enum SeriesState {
    Gauge(f64),
    Counter(f64),
    Histogram {
        buckets: Vec<f64>,
        counts: Vec<u64>,
        sum: f64,
        count: u64,
    },
    Summary {
        sum: f64,
        count: u64,
    },
}

struct MetricEntry {
    name: String,
    description: String,
    labels: Vec<String>,
    kind: MetricKind,
    buckets: Vec<f64>,
    /// Series keyed by label values; the empty key is the unlabeled series
    series: RwLock<BTreeMap<Vec<String>, SeriesState>>,
}

impl MetricEntry {
    fn fresh_series(&self) -> SeriesState {
        match self.kind {
            MetricKind::Gauge => SeriesState::Gauge(0.0),
            MetricKind::Counter => SeriesState::Counter(0.0),
            MetricKind::Histogram => SeriesState::Histogram {
                buckets: self.buckets.clone(),
                counts: vec![0; self.buckets.len()],
                sum: 0.0,
                count: 0,
            },
            MetricKind::Summary => SeriesState::Summary { sum: 0.0, count: 0 },
        }
    }
}

/// Registry of named metrics; duplicate registration fails
pub struct MetricRegistry {
    metrics: RwLock<HashMap<String, Arc<MetricEntry>>>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self {
            metrics: RwLock::new(HashMap::new()),
        }
    }

    fn register(
        &self,
        name: &str,
        description: &str,
        labels: Vec<String>,
        kind: MetricKind,
        buckets: Option<Vec<f64>>,
    ) -> Result<()> {
        let mut metrics = self.metrics.write();
        if metrics.contains_key(name) {
            return Err(Error::validation(format!(
                "metric '{name}' is already registered"
            )));
        }
        metrics.insert(
            name.to_string(),
            Arc::new(MetricEntry {
                name: name.to_string(),
                description: description.to_string(),
                labels,
                kind,
                buckets: buckets.unwrap_or_else(|| DEFAULT_BUCKETS.to_vec()),
                series: RwLock::new(BTreeMap::new()),
            }),
        );
        Ok(())
    }

    pub fn register_gauge(&self, name: &str, description: &str, labels: &[&str]) -> Result<()> {
        self.register(
            name,
            description,
            labels.iter().map(|s| s.to_string()).collect(),
            MetricKind::Gauge,
            None,
        )
    }

    pub fn register_counter(&self, name: &str, description: &str, labels: &[&str]) -> Result<()> {
        self.register(
            name,
            description,
            labels.iter().map(|s| s.to_string()).collect(),
            MetricKind::Counter,
            None,
        )
    }

    pub fn register_histogram(
        &self,
        name: &str,
        description: &str,
        labels: &[&str],
        buckets: Option<Vec<f64>>,
    ) -> Result<()> {
        self.register(
            name,
            description,
            labels.iter().map(|s| s.to_string()).collect(),
            MetricKind::Histogram,
            buckets,
        )
    }

    pub fn register_summary(&self, name: &str, description: &str, labels: &[&str]) -> Result<()> {
        self.register(
            name,
            description,
            labels.iter().map(|s| s.to_string()).collect(),
            MetricKind::Summary,
            None,
        )
    }

    fn entry(&self, name: &str, kind: MetricKind) -> Result<Arc<MetricEntry>> {
        let metrics = self.metrics.read();
        let entry = metrics
            .get(name)
            .ok_or_else(|| Error::not_found("metric", name))?;
        if entry.kind != kind {
            return Err(Error::invalid_input(
                name,
                format!("metric is a {:?}, not a {kind:?}", entry.kind),
            ));
        }
        Ok(entry.clone())
    }

    fn check_labels(entry: &MetricEntry, label_values: &[&str]) -> Result<Vec<String>> {
        if label_values.len() != entry.labels.len() {
            return Err(Error::invalid_input(
                entry.name.clone(),
                format!(
                    "expected {} label value(s), got {}",
                    entry.labels.len(),
                    label_values.len()
                ),
            ));
        }
        Ok(label_values.iter().map(|s| s.to_string()).collect())
    }

    pub fn set_gauge(&self, name: &str, label_values: &[&str], value: f64) -> Result<()> {
        let entry = self.entry(name, MetricKind::Gauge)?;
        let key = Self::check_labels(&entry, label_values)?;
        let mut series = entry.series.write();
        let state = series.entry(key).or_insert_with(|| entry.fresh_series());
        if let SeriesState::Gauge(current) = state {
            *current = value;
        }
        Ok(())
    }

    pub fn inc_counter(&self, name: &str, label_values: &[&str], by: f64) -> Result<()> {
        if by < 0.0 {
            return Err(Error::invalid_input(name, "counters only move forward"));
        }
        let entry = self.entry(name, MetricKind::Counter)?;
        let key = Self::check_labels(&entry, label_values)?;
        let mut series = entry.series.write();
        let state = series.entry(key).or_insert_with(|| entry.fresh_series());
        if let SeriesState::Counter(current) = state {
            *current += by;
        }
        Ok(())
    }

    /// Record an observation into a histogram or summary
    pub fn observe(&self, name: &str, label_values: &[&str], value: f64) -> Result<()> {
        let metrics = self.metrics.read();
        let entry = metrics
            .get(name)
            .ok_or_else(|| Error::not_found("metric", name))?
            .clone();
        drop(metrics);

        let key = Self::check_labels(&entry, label_values)?;
        let mut series = entry.series.write();
        let state = series.entry(key).or_insert_with(|| entry.fresh_series());
        match state {
            SeriesState::Histogram {
                buckets,
                counts,
                sum,
                count,
            } => {
                for (bucket, slot) in buckets.iter().zip(counts.iter_mut()) {
                    if value <= *bucket {
                        *slot += 1;
                    }
                }
                *sum += value;
                *count += 1;
                Ok(())
            }
            SeriesState::Summary { sum, count } => {
                *sum += value;
                *count += 1;
                Ok(())
            }
            _ => Err(Error::invalid_input(
                name,
                "observe() requires a histogram or summary",
            )),
        }
    }

    pub fn gauge_value(&self, name: &str, label_values: &[&str]) -> Option<f64> {
        let metrics = self.metrics.read();
        let entry = metrics.get(name)?;
        let key: Vec<String> = label_values.iter().map(|s| s.to_string()).collect();
        let result = match entry.series.read().get(&key) {
            Some(SeriesState::Gauge(v)) => Some(*v),
            _ => None,
        };
        result
    }

    pub fn counter_value(&self, name: &str, label_values: &[&str]) -> Option<f64> {
        let metrics = self.metrics.read();
        let entry = metrics.get(name)?;
        let key: Vec<String> = label_values.iter().map(|s| s.to_string()).collect();
        let result = match entry.series.read().get(&key) {
            Some(SeriesState::Counter(v)) => Some(*v),
            _ => None,
        };
        result
    }

    pub fn metric_count(&self) -> usize {
        self.metrics.read().len()
    }

    /// Render all metrics in the Prometheus text format
    pub fn render_prometheus(&self) -> String {
        let metrics = self.metrics.read();
        let mut names: Vec<&String> = metrics.keys().collect();
        names.sort();

        let mut out = String::new();
        for name in names {
            let entry = &metrics[name];
            let _ = writeln!(out, "# HELP {} {}", entry.name, entry.description);
            let _ = writeln!(
                out,
                "# TYPE {} {}",
                entry.name,
                entry.kind.prometheus_type()
            );
            let series = entry.series.read();
            for (label_values, state) in series.iter() {
                let label_text = render_labels(&entry.labels, label_values);
                match state {
                    SeriesState::Gauge(v) | SeriesState::Counter(v) => {
                        let _ = writeln!(out, "{}{} {}", entry.name, label_text, v);
                    }
                    SeriesState::Summary { sum, count } => {
                        let _ = writeln!(out, "{}_sum{} {}", entry.name, label_text, sum);
                        let _ = writeln!(out, "{}_count{} {}", entry.name, label_text, count);
                    }
                    SeriesState::Histogram {
                        buckets,
                        counts,
                        sum,
                        count,
                    } => {
                        for (bucket, bucket_count) in buckets.iter().zip(counts.iter()) {
                            let le = render_labels_with(
                                &entry.labels,
                                label_values,
                                &[("le", &bucket.to_string())],
                            );
                            let _ =
                                writeln!(out, "{}_bucket{} {}", entry.name, le, bucket_count);
                        }
                        let inf =
                            render_labels_with(&entry.labels, label_values, &[("le", "+Inf")]);
                        let _ = writeln!(out, "{}_bucket{} {}", entry.name, inf, count);
                        let _ = writeln!(out, "{}_sum{} {}", entry.name, label_text, sum);
                        let _ = writeln!(out, "{}_count{} {}", entry.name, label_text, count);
                    }
                }
            }
        }
        out
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn render_labels(names: &[String], values: &[String]) -> String {
    render_labels_with(names, values, &[])
}

fn render_labels_with(names: &[String], values: &[String], extra: &[(&str, &str)]) -> String {
    let mut pairs: Vec<String> = names
        .iter()
        .zip(values.iter())
        .map(|(n, v)| format!("{n}=\"{v}\""))
        .collect();
    for (n, v) in extra {
        pairs.push(format!("{n}=\"{v}\""));
    }
    if pairs.is_empty() {
        String::new()
    } else {
        format!("{{{}}}", pairs.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = MetricRegistry::new();
        registry.register_gauge("cpu", "CPU usage", &[]).unwrap();
        assert!(registry.register_gauge("cpu", "again", &[]).is_err());
        // Even across kinds: the name is taken
        assert!(registry.register_counter("cpu", "count", &[]).is_err());
    }

    #[test]
    fn test_gauge_set_and_read() {
        let registry = MetricRegistry::new();
        registry.register_gauge("mem", "memory", &[]).unwrap();
        registry.set_gauge("mem", &[], 42.5).unwrap();
        assert_eq!(registry.gauge_value("mem", &[]), Some(42.5));
    }

    #[test]
    fn test_counter_with_labels() {
        let registry = MetricRegistry::new();
        registry
            .register_counter("events_total", "events", &["event_type", "source"])
            .unwrap();
        registry
            .inc_counter("events_total", &["system/started", "core"], 1.0)
            .unwrap();
        registry
            .inc_counter("events_total", &["system/started", "core"], 1.0)
            .unwrap();
        assert_eq!(
            registry.counter_value("events_total", &["system/started", "core"]),
            Some(2.0)
        );

        // Wrong label arity rejected
        assert!(registry.inc_counter("events_total", &["only-one"], 1.0).is_err());
        // Counters cannot decrease
        assert!(registry
            .inc_counter("events_total", &["a", "b"], -1.0)
            .is_err());
    }

    #[test]
    fn test_histogram_and_summary_observe() {
        let registry = MetricRegistry::new();
        registry
            .register_histogram("latency", "latency", &[], Some(vec![0.1, 1.0]))
            .unwrap();
        registry.register_summary("sizes", "sizes", &[]).unwrap();

        registry.observe("latency", &[], 0.05).unwrap();
        registry.observe("latency", &[], 0.5).unwrap();
        registry.observe("latency", &[], 5.0).unwrap();
        registry.observe("sizes", &[], 10.0).unwrap();

        let text = registry.render_prometheus();
        assert!(text.contains("latency_bucket{le=\"0.1\"} 1"));
        assert!(text.contains("latency_bucket{le=\"1\"} 2"));
        assert!(text.contains("latency_bucket{le=\"+Inf\"} 3"));
        assert!(text.contains("sizes_sum 10"));
        assert!(text.contains("sizes_count 1"));
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let registry = MetricRegistry::new();
        registry.register_gauge("g", "gauge", &[]).unwrap();
        assert!(registry.inc_counter("g", &[], 1.0).is_err());
        assert!(registry.observe("g", &[], 1.0).is_err());
    }
}
