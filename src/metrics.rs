//! In-memory metrics collection with percentile computation.
//!
//! Counters sum across samples, gauges report the latest sample, and
//! histograms retain raw samples for percentile math. Stores are windowed:
//! the periodic flush emits a snapshot and clears everything, so values
//! cover one flush interval rather than the process lifetime.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;

use crate::sink::{LogSink, StdoutSink};

/// Upper bound on retained samples per series. Oldest samples are evicted
/// first; the windowed flush normally clears the stores long before the cap
/// is reached.
const MAX_SAMPLES_PER_SERIES: usize = 65_536;

/// Metric sample kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
    Summary,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
            MetricKind::Summary => "summary",
        };
        f.write_str(name)
    }
}

/// String tag set. Sorted keys keep composite store keys deterministic.
pub type Tags = BTreeMap<String, String>;

/// One recorded sample.
#[derive(Debug, Clone, Serialize)]
pub struct Metric {
    pub name: String,
    pub kind: MetricKind,
    pub value: f64,
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub tags: Tags,
}

/// Percentile summary over one histogram's raw samples.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramSummary {
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub min: f64,
    pub max: f64,
    pub count: u64,
    pub sum: f64,
    pub avg: f64,
}

impl HistogramSummary {
    /// Summarize a sample set. Returns `None` for an empty set, so snapshots
    /// never contain NaN and never divide by zero.
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let count = sorted.len() as u64;
        let sum: f64 = sorted.iter().sum();

        Some(Self {
            p50: percentile(&sorted, 50.0),
            p75: percentile(&sorted, 75.0),
            p90: percentile(&sorted, 90.0),
            p95: percentile(&sorted, 95.0),
            p99: percentile(&sorted, 99.0),
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            count,
            sum,
            avg: sum / count as f64,
        })
    }
}

/// Nearest-rank percentile: `index = ceil(p/100 * len) - 1`, clamped.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    let index = rank.saturating_sub(1).min(sorted.len() - 1);
    sorted[index]
}

/// One value in a metrics snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SnapshotValue {
    Scalar(f64),
    Histogram(HistogramSummary),
}

/// Snapshot of all current values: counters summed, gauges latest,
/// histograms as `"{name}.histogram"` percentile summaries.
pub type Snapshot = BTreeMap<String, SnapshotValue>;

/// Counter/gauge/histogram aggregation with windowed flush.
pub struct MetricsCollector {
    /// All samples, keyed `"{name}:{kind}:{tags-as-json}"`.
    metrics: DashMap<String, Vec<Metric>>,
    /// Raw histogram samples, keyed by name only. Tags ride on the generic
    /// records above but do not partition percentile math; summaries
    /// aggregate across tag sets for the same name.
    histograms: DashMap<String, Vec<f64>>,
    sink: Arc<dyn LogSink>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    /// Collector that flushes to stdout.
    pub fn new() -> Self {
        Self::with_sink(Arc::new(StdoutSink))
    }

    /// Collector flushing to the given sink (tests use a memory sink).
    pub fn with_sink(sink: Arc<dyn LogSink>) -> Self {
        Self {
            metrics: DashMap::new(),
            histograms: DashMap::new(),
            sink,
        }
    }

    /// Record a counter sample. The counter's current value is the sum of
    /// every sample recorded under the same name+tags since the last
    /// flush/reset.
    pub fn increment(&self, name: &str, value: f64, tags: Option<Tags>) {
        self.record(Metric {
            name: name.to_string(),
            kind: MetricKind::Counter,
            value,
            timestamp: Utc::now().timestamp_millis(),
            tags: tags.unwrap_or_default(),
        });
    }

    /// Record a gauge sample; the current value is the latest sample.
    pub fn gauge(&self, name: &str, value: f64, tags: Option<Tags>) {
        self.record(Metric {
            name: name.to_string(),
            kind: MetricKind::Gauge,
            value,
            timestamp: Utc::now().timestamp_millis(),
            tags: tags.unwrap_or_default(),
        });
    }

    /// Append a raw histogram sample and record the generic sample.
    pub fn histogram(&self, name: &str, value: f64, tags: Option<Tags>) {
        {
            let mut samples = self.histograms.entry(name.to_string()).or_default();
            if samples.len() >= MAX_SAMPLES_PER_SERIES {
                samples.remove(0);
            }
            samples.push(value);
        }

        self.record(Metric {
            name: name.to_string(),
            kind: MetricKind::Histogram,
            value,
            timestamp: Utc::now().timestamp_millis(),
            tags: tags.unwrap_or_default(),
        });
    }

    /// Record a duration into the `"{name}.duration"` histogram.
    pub fn timing(&self, name: &str, duration_ms: f64, tags: Option<Tags>) {
        self.histogram(&format!("{}.duration", name), duration_ms, tags);
    }

    /// Await `f()` and record its wall time, tagged `status=success` or
    /// `status=error`. The original result is returned unmodified.
    pub async fn time<T, E, F, Fut>(&self, name: &str, tags: Option<Tags>, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let start = Instant::now();
        let result = f().await;

        let mut tags = tags.unwrap_or_default();
        tags.insert(
            "status".to_string(),
            if result.is_ok() { "success" } else { "error" }.to_string(),
        );
        self.timing(name, start.elapsed().as_millis() as f64, Some(tags));

        result
    }

    fn record(&self, metric: Metric) {
        let key = metric_key(&metric);
        let mut samples = self.metrics.entry(key).or_default();
        if samples.len() >= MAX_SAMPLES_PER_SERIES {
            samples.remove(0);
        }
        samples.push(metric);
    }

    /// Current values: counters summed, gauges latest, histograms as
    /// `"{name}.histogram"` percentile summaries. Histograms with no samples
    /// are omitted entirely.
    pub fn snapshot(&self) -> Snapshot {
        let mut snapshot = Snapshot::new();

        for entry in self.metrics.iter() {
            let samples = entry.value();
            let Some(latest) = samples.last() else {
                continue;
            };
            match latest.kind {
                MetricKind::Counter => {
                    let total: f64 = samples.iter().map(|m| m.value).sum();
                    snapshot.insert(entry.key().clone(), SnapshotValue::Scalar(total));
                }
                MetricKind::Gauge => {
                    snapshot.insert(entry.key().clone(), SnapshotValue::Scalar(latest.value));
                }
                MetricKind::Histogram | MetricKind::Summary => {}
            }
        }

        for entry in self.histograms.iter() {
            if let Some(summary) = HistogramSummary::from_samples(entry.value()) {
                snapshot.insert(
                    format!("{}.histogram", entry.key()),
                    SnapshotValue::Histogram(summary),
                );
            }
        }

        snapshot
    }

    /// Emit the current snapshot to the sink and clear both stores.
    /// Values are therefore windowed per flush interval, not cumulative.
    pub fn flush(&self) {
        let snapshot = self.snapshot();
        let rendered = serde_json::to_string(&snapshot).unwrap_or_else(|_| "{}".to_string());
        self.sink.write_line(&format!("Flushing metrics: {}", rendered));

        self.metrics.clear();
        self.histograms.clear();
    }

    /// Flush on a fixed interval, forever. Spawn this in production only;
    /// see [`crate::init`].
    pub async fn run_flush_task(&self, period: Duration) {
        let mut timer = tokio::time::interval(period);
        // First tick fires immediately; skip it so the first window is full.
        timer.tick().await;

        loop {
            timer.tick().await;
            self.flush();
        }
    }

    /// Clear both stores immediately (test isolation).
    pub fn reset(&self) {
        self.metrics.clear();
        self.histograms.clear();
    }
}

fn metric_key(metric: &Metric) -> String {
    let tags = serde_json::to_string(&metric.tags).unwrap_or_default();
    format!("{}:{}:{}", metric.name, metric.kind, tags)
}

static GLOBAL_METRICS: LazyLock<MetricsCollector> = LazyLock::new(MetricsCollector::new);

/// The process-wide metrics collector.
pub fn metrics() -> &'static MetricsCollector {
    &GLOBAL_METRICS
}
