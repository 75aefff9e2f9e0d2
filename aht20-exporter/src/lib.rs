//! Prometheus exporter for AHT20 temperature and humidity sensors.
//!
//! Several AHT20 sensors share one I2C bus behind a TCA9548A multiplexer.
//! A poll loop reads them one after the other on a fixed interval and keeps
//! the last good reading of each in a gauge set, which an HTTP server
//! renders for Prometheus on every scrape.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │  I2C / TCA9548A │────>│ SensorRegistry  │────>│    GaugeSet     │────>│   HTTP Server   │
//! │  (AHT20 x N)    │     │  (SensorPoller) │     │ (last known)    │     │   (/metrics)    │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! aht20-exporter --sensors 3
//! aht20-exporter --config aht20.json5
//! AHT20_SENSOR_COUNT=2 aht20-exporter --simulate
//! ```

pub mod aht20;
pub mod args;
pub mod bus;
pub mod collector;
pub mod config;
pub mod error;
pub mod http;
pub mod poller;
pub mod registry;
pub mod sensor;

pub use aht20::Aht20Factory;
pub use args::ExporterArgs;
pub use collector::{GaugeKind, GaugeSet, SharedGaugeSet};
pub use config::{ExporterConfig, LogFormat, LoggingConfig};
pub use error::{ExporterError, Result};
pub use http::HttpServer;
pub use poller::SensorPoller;
pub use registry::SensorRegistry;
pub use sensor::{Reading, SensorError, SensorFactory, SensorHandle, SensorLabel};

/// Initialize tracing with the given configuration.
///
/// `RUST_LOG` replaces the filter entirely. Otherwise this crate logs at the
/// configured level and every dependency at `warn`.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directives(&config.level))
            .map_err(|e| ExporterError::config(format!("Invalid log level: {}", e)))?,
    };

    let layer = match config.format {
        LogFormat::Text => fmt::layer().boxed(),
        LogFormat::Json => fmt::layer().json().boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .map_err(|e| ExporterError::config(format!("Failed to initialize tracing: {}", e)))
}

fn default_directives(level: &str) -> String {
    format!("warn,{}={}", env!("CARGO_CRATE_NAME"), level)
}
