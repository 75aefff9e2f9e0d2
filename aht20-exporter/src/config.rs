//! Configuration for the AHT20 exporter.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ExporterError, Result};

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Sensor and bus settings.
    #[serde(default)]
    pub sensors: SensorsConfig,

    /// Polling settings.
    #[serde(default)]
    pub poll: PollConfig,

    /// Prometheus exporter settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which sensors to initialize and how to reach them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorsConfig {
    /// Number of sensors, one per multiplexer channel starting at 0 (default: 3).
    #[serde(default = "default_sensor_count")]
    pub count: usize,

    /// I2C bus settings.
    #[serde(default)]
    pub bus: BusConfig,
}

fn default_sensor_count() -> usize {
    3
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            count: default_sensor_count(),
            bus: BusConfig::default(),
        }
    }
}

/// I2C bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// I2C adapter number, opened as `/dev/i2c-{adapter}` (default: 1).
    #[serde(default = "default_adapter")]
    pub adapter: u8,

    /// TCA9548A multiplexer address (default: 0x70).
    #[serde(default = "default_mux_address")]
    pub mux_address: u8,

    /// AHT20 address on every multiplexer channel (default: 0x38).
    #[serde(default = "default_sensor_address")]
    pub sensor_address: u8,

    /// Use the in-process simulated bus instead of real hardware.
    #[serde(default)]
    pub simulate: bool,
}

fn default_adapter() -> u8 {
    1
}

fn default_mux_address() -> u8 {
    0x70
}

fn default_sensor_address() -> u8 {
    0x38
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            adapter: default_adapter(),
            mux_address: default_mux_address(),
            sensor_address: default_sensor_address(),
            simulate: false,
        }
    }
}

/// Poll loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Pause between two polls of all sensors, in seconds (default: 2.0).
    #[serde(default = "default_interval_secs")]
    pub interval_secs: f64,
}

fn default_interval_secs() -> f64 {
    2.0
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

impl PollConfig {
    /// The poll interval as a [`Duration`].
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_secs)
    }
}

/// Prometheus HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Address to listen on (default: "0.0.0.0:9101").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,

    /// Metric name prefix (default: "aht20").
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_listen() -> String {
    "0.0.0.0:9101".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

fn default_prefix() -> String {
    "aht20".to_string()
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
            prefix: default_prefix(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// Structured JSON format.
    Json,
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self> {
        let config: ExporterConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// The sensor count is not bounded here: a count of zero is reported as
    /// a startup failure when the registry comes out empty, and indices past
    /// the last multiplexer channel are skipped like any sensor that fails
    /// to initialize.
    pub fn validate(&self) -> Result<()> {
        if !self.poll.interval_secs.is_finite() || self.poll.interval_secs <= 0.0 {
            return Err(ExporterError::config(
                "poll.interval_secs must be > 0".to_string(),
            ));
        }

        // Validate listen address format
        if self
            .prometheus
            .listen
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(ExporterError::config(format!(
                "Invalid listen address: {}",
                self.prometheus.listen
            )));
        }

        if !self.prometheus.path.starts_with('/') {
            return Err(ExporterError::config(
                "Metrics path must start with /".to_string(),
            ));
        }

        if self.prometheus.prefix.is_empty() {
            return Err(ExporterError::config(
                "Metric prefix must not be empty".to_string(),
            ));
        }

        if self.logging.level.parse::<tracing::Level>().is_err() {
            return Err(ExporterError::config(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }
}
