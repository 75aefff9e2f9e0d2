//! CLI argument parsing.

use std::path::PathBuf;

use clap::Parser;

use crate::config::ExporterConfig;

/// Prometheus exporter for AHT20 sensors behind a TCA9548A multiplexer.
#[derive(Parser, Debug, Clone)]
#[command(name = "aht20-exporter")]
#[command(about = "Export AHT20 temperature and humidity readings as Prometheus metrics")]
#[command(version)]
pub struct ExporterArgs {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Number of sensors to initialize, one per multiplexer channel (overrides config).
    #[arg(short = 'n', long = "sensors", env = "AHT20_SENSOR_COUNT")]
    pub sensors: Option<usize>,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    pub listen: Option<String>,

    /// Use the simulated bus instead of the I2C device.
    #[arg(long)]
    pub simulate: bool,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,
}

impl ExporterArgs {
    /// Apply command-line overrides on top of the loaded configuration.
    pub fn apply(&self, config: &mut ExporterConfig) {
        if let Some(count) = self.sensors {
            config.sensors.count = count;
        }
        if let Some(listen) = &self.listen {
            config.prometheus.listen = listen.clone();
        }
        if self.simulate {
            config.sensors.bus.simulate = true;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
    }
}
