//! Gauge state shared between the poll loop and the HTTP server.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::sensor::{Reading, SensorLabel};

/// The two gauges exported per sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GaugeKind {
    Temperature,
    Humidity,
}

impl GaugeKind {
    pub const ALL: [GaugeKind; 2] = [GaugeKind::Temperature, GaugeKind::Humidity];

    /// Metric name without the prefix.
    pub fn suffix(&self) -> &'static str {
        match self {
            GaugeKind::Temperature => "temperature_celsius",
            GaugeKind::Humidity => "humidity",
        }
    }

    pub fn help(&self) -> &'static str {
        match self {
            GaugeKind::Temperature => "Temperature in celsius provided by aht sensor",
            GaugeKind::Humidity => "Humidity in percents provided by aht sensor",
        }
    }
}

/// Poll loop statistics.
#[derive(Debug, Clone, Default)]
pub struct PollStats {
    /// Completed polls of the whole registry.
    pub polls: u64,
    /// Reads that updated the gauges.
    pub reads_succeeded: u64,
    /// Reads that failed with a routine bus error.
    pub reads_failed_transient: u64,
    /// Reads that failed in any other way.
    pub reads_failed_unexpected: u64,
}

/// Last known value of every `(gauge, sensor)` pair.
///
/// Values are only ever overwritten, never removed: a sensor that stops
/// answering keeps its last good reading.
pub struct GaugeSet {
    prefix: String,
    values: RwLock<BTreeMap<(GaugeKind, SensorLabel), f64>>,
    stats: RwLock<PollStats>,
}

/// Shareable gauge set handle.
pub type SharedGaugeSet = Arc<GaugeSet>;

impl GaugeSet {
    /// Create an empty gauge set whose metric names start with `prefix`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            values: RwLock::new(BTreeMap::new()),
            stats: RwLock::new(PollStats::default()),
        }
    }

    /// Full metric name of a gauge.
    pub fn metric_name(&self, kind: GaugeKind) -> String {
        format!("{}_{}", self.prefix, kind.suffix())
    }

    /// Overwrite one gauge.
    pub fn set(&self, kind: GaugeKind, label: &SensorLabel, value: f64) {
        self.values.write().insert((kind, label.clone()), value);
    }

    /// Overwrite both gauges of a sensor at once and count the read.
    pub fn record(&self, label: &SensorLabel, reading: &Reading) {
        {
            let mut values = self.values.write();
            values.insert((GaugeKind::Temperature, label.clone()), reading.temperature);
            values.insert((GaugeKind::Humidity, label.clone()), reading.humidity);
        }
        self.stats.write().reads_succeeded += 1;
    }

    /// Count a failed read. The gauges are left untouched.
    pub fn record_failure(&self, transient: bool) {
        let mut stats = self.stats.write();
        if transient {
            stats.reads_failed_transient += 1;
        } else {
            stats.reads_failed_unexpected += 1;
        }
    }

    /// Count a completed poll of the registry.
    pub fn record_poll(&self) {
        self.stats.write().polls += 1;
    }

    /// Current value of a gauge, if the sensor was ever read.
    pub fn get(&self, kind: GaugeKind, label: &SensorLabel) -> Option<f64> {
        self.values.read().get(&(kind, label.clone())).copied()
    }

    /// Number of stored series.
    pub fn series_count(&self) -> usize {
        self.values.read().len()
    }

    /// Get poll statistics.
    pub fn stats(&self) -> PollStats {
        self.stats.read().clone()
    }

    /// Render the gauges in Prometheus exposition format.
    pub fn render(&self) -> String {
        let values = self.values.read();
        let mut output = Vec::with_capacity(256 + values.len() * 64);

        for kind in GaugeKind::ALL {
            let name = self.metric_name(kind);
            writeln!(output, "# HELP {} {}", name, kind.help()).ok();
            writeln!(output, "# TYPE {} gauge", name).ok();

            for ((_, label), value) in values.iter().filter(|((k, _), _)| *k == kind) {
                writeln!(
                    output,
                    "{}{{sensor=\"{}\"}} {}",
                    name,
                    escape_label_value(label.as_str()),
                    format_value(*value)
                )
                .ok();
            }
        }

        // Exporter self-metrics
        let stats = self.stats.read();
        let prefix = &self.prefix;
        writeln!(output).ok();
        writeln!(output, "# TYPE {}_exporter_series_total gauge", prefix).ok();
        writeln!(output, "{}_exporter_series_total {}", prefix, values.len()).ok();

        writeln!(output, "# TYPE {}_exporter_polls_total counter", prefix).ok();
        writeln!(output, "{}_exporter_polls_total {}", prefix, stats.polls).ok();

        writeln!(output, "# TYPE {}_exporter_reads_total counter", prefix).ok();
        for (result, count) in [
            ("ok", stats.reads_succeeded),
            ("transient_error", stats.reads_failed_transient),
            ("unexpected_error", stats.reads_failed_unexpected),
        ] {
            writeln!(
                output,
                "{}_exporter_reads_total{{result=\"{}\"}} {}",
                prefix, result, count
            )
            .ok();
        }

        String::from_utf8(output).unwrap_or_default()
    }
}

/// Escape special characters in label values.
fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Format a floating point value for Prometheus.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}
