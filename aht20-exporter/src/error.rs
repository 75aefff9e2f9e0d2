//! Error types for the exporter.

use std::net::SocketAddr;

use thiserror::Error;

/// Result type alias using [`ExporterError`].
pub type Result<T> = std::result::Result<T, ExporterError>;

/// Errors that stop the exporter.
///
/// Per-sensor failures are [`crate::sensor::SensorError`] and never surface here.
#[derive(Debug, Error)]
pub enum ExporterError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration parse error.
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] json5::Error),

    /// No sensor could be initialized.
    #[error("No sensors initialized ({requested} requested)")]
    NoSensors { requested: usize },

    /// The metrics listener could not be bound.
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The HTTP server failed while running.
    #[error("HTTP server error: {0}")]
    Server(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExporterError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        ExporterError::Config(msg.into())
    }
}
