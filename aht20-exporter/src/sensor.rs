//! Sensor capability, readings and read errors.

use std::fmt;

use embedded_hal::i2c::ErrorKind;
use thiserror::Error;

/// A single temperature/humidity measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Temperature in degrees Celsius.
    pub temperature: f64,
    /// Relative humidity in percent.
    pub humidity: f64,
}

impl Reading {
    pub fn new(temperature: f64, humidity: f64) -> Self {
        Self {
            temperature,
            humidity,
        }
    }

    /// Round both values to one decimal place (half away from zero).
    pub fn rounded(&self) -> Self {
        Self {
            temperature: round_one_decimal(self.temperature),
            humidity: round_one_decimal(self.humidity),
        }
    }
}

/// Round to one decimal place, ties away from zero.
///
/// `23.46` becomes `23.5`, `55.04` becomes `55.0`, `-0.25` becomes `-0.3`.
pub fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Stable label of a sensor, derived from its bus position.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SensorLabel(String);

impl SensorLabel {
    /// Label for the sensor at the given multiplexer index (`sensor{index}`).
    pub fn for_index(index: usize) -> Self {
        Self(format!("sensor{}", index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SensorLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors raised while constructing or reading a sensor.
#[derive(Debug, Error)]
pub enum SensorError {
    /// Transfer failure on the bus (NACK, arbitration loss, overrun).
    #[error("I2C bus error: {0:?}")]
    Bus(ErrorKind),

    /// The bus device could not be opened.
    #[error("I2C bus unavailable: {0}")]
    Unavailable(String),

    /// The sensor did not finish its measurement in time.
    #[error("Sensor busy: measurement not ready")]
    Busy,

    /// The sensor reports it is not calibrated.
    #[error("Sensor not calibrated")]
    NotCalibrated,

    /// The multiplexer has no channel for this sensor index.
    #[error("No multiplexer channel for sensor index {0}")]
    InvalidChannel(usize),

    /// Anything outside the expected failure modes of a bus read.
    #[error("Unexpected sensor failure: {0}")]
    Unexpected(String),
}

impl SensorError {
    /// Wrap an `embedded-hal` I2C error.
    pub fn bus<E: embedded_hal::i2c::Error>(error: E) -> Self {
        SensorError::Bus(error.kind())
    }

    /// Whether this is one of the routine failures of a noisy bus.
    ///
    /// Transient failures are logged as warnings, everything else as errors.
    /// Both are swallowed at the sensor level.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SensorError::Bus(_) | SensorError::Busy | SensorError::NotCalibrated
        )
    }
}

/// A physical sensor that can be asked for its current reading.
pub trait SensorHandle: Send {
    fn read(&mut self) -> Result<Reading, SensorError>;
}

/// Builds the sensor handle at a given bus position.
pub trait SensorFactory {
    fn create(&self, index: usize) -> Result<Box<dyn SensorHandle>, SensorError>;
}
