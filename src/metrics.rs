//! Prometheus metrics for dd write benchmarks.
//!
//! All series live in a [`DdMetrics`] value that owns its own registry. It
//! is built once at startup and shared by the benchmark runner (writer)
//! and the HTTP handler (reader). Prometheus types synchronize internally,
//! so no extra locking is applied here.
//!
//! Series:
//! - `dd_writes_total_v2{bs,count,result}`: one increment per trial
//! - `dd_writes_duration_seconds_v2{bs,count}`: running sum of seconds
//! - `dd_writes_throughput_MBs_v2{bs,count}`: running sum of MB/s
//! - `version{version}`: always 1

use anyhow::Result;
use prometheus::core::Collector;
use prometheus::proto::MetricType;
use prometheus::{CounterVec, Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};

use crate::runner::TrialOutcome;

/// Content type for the text exposition format.
pub const TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

pub const WRITES_TOTAL: &str = "dd_writes_total_v2";
pub const WRITES_DURATION: &str = "dd_writes_duration_seconds_v2";
pub const WRITES_THROUGHPUT: &str = "dd_writes_throughput_MBs_v2";
pub const VERSION: &str = "version";

/// Registry and series for one process.
pub struct DdMetrics {
    registry: Registry,
    writes_total: CounterVec,
    writes_duration: GaugeVec,
    writes_throughput: GaugeVec,
    version: Gauge,
}

impl DdMetrics {
    /// Create and register every series. The version gauge is set to 1.
    pub fn new(version: &str) -> Result<Self> {
        let registry = Registry::new();

        let writes_total = CounterVec::new(
            Opts::new(WRITES_TOTAL, "Count of all DD writes"),
            &["bs", "count", "result"],
        )?;
        let writes_duration = GaugeVec::new(
            Opts::new(WRITES_DURATION, "Duration of all dd writes"),
            &["bs", "count"],
        )?;
        let writes_throughput = GaugeVec::new(
            Opts::new(WRITES_THROUGHPUT, "Throughput of all dd writes"),
            &["bs", "count"],
        )?;
        let version_gauge = Gauge::with_opts(
            Opts::new(VERSION, "Version information about this binary")
                .const_label("version", version),
        )?;

        registry.register(Box::new(writes_total.clone()))?;
        registry.register(Box::new(writes_duration.clone()))?;
        registry.register(Box::new(writes_throughput.clone()))?;
        registry.register(Box::new(version_gauge.clone()))?;

        version_gauge.set(1.0);

        Ok(Self {
            registry,
            writes_total,
            writes_duration,
            writes_throughput,
            version: version_gauge,
        })
    }

    /// Count one finished trial.
    pub fn inc_write(&self, bs: &str, count: &str, outcome: TrialOutcome) {
        self.writes_total
            .with_label_values(&[bs, count, outcome.as_label()])
            .inc();
    }

    /// Add observed seconds to the running duration sum.
    pub fn add_duration(&self, bs: &str, count: &str, secs: f64) {
        self.writes_duration.with_label_values(&[bs, count]).add(secs);
    }

    /// Add observed MB/s to the running throughput sum.
    pub fn add_throughput(&self, bs: &str, count: &str, mbps: f64) {
        self.writes_throughput
            .with_label_values(&[bs, count])
            .add(mbps);
    }

    /// Current attempt count for one outcome.
    pub fn writes(&self, bs: &str, count: &str, outcome: TrialOutcome) -> f64 {
        sample(
            &self.writes_total,
            &[("bs", bs), ("count", count), ("result", outcome.as_label())],
        )
        .unwrap_or(0.0)
    }

    /// Current duration sum, `None` if never recorded.
    pub fn duration_sum(&self, bs: &str, count: &str) -> Option<f64> {
        sample(&self.writes_duration, &[("bs", bs), ("count", count)])
    }

    /// Current throughput sum, `None` if never recorded.
    pub fn throughput_sum(&self, bs: &str, count: &str) -> Option<f64> {
        sample(&self.writes_throughput, &[("bs", bs), ("count", count)])
    }

    pub fn version(&self) -> f64 {
        self.version.get()
    }

    /// Encode every series in the Prometheus text format.
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

// `with_label_values` would create the child; read from a collect instead
// so looking at a value never adds an empty series to the export.
fn sample(collector: &impl Collector, labels: &[(&str, &str)]) -> Option<f64> {
    for family in collector.collect() {
        let is_counter = family.get_field_type() == MetricType::COUNTER;
        for metric in family.get_metric() {
            let matches = labels.iter().all(|(name, value)| {
                metric
                    .get_label()
                    .iter()
                    .any(|l| l.get_name() == *name && l.get_value() == *value)
            });
            if matches {
                return Some(if is_counter {
                    metric.get_counter().get_value()
                } else {
                    metric.get_gauge().get_value()
                });
            }
        }
    }
    None
}
