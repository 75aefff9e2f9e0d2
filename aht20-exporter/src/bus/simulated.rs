//! Simulated bus with a TCA9548A and AHT20 sensors.
//!
//! Used for `--simulate` runs on machines without the hardware, and by tests
//! to drive the real AHT20 driver end to end.

use std::collections::BTreeMap;

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation};

use crate::aht20::{
    CMD_CALIBRATE, CMD_SOFT_RESET, CMD_TRIGGER, STATUS_BUSY, STATUS_CALIBRATED, encode_frame,
};
use crate::sensor::Reading;

/// Behaviour of one simulated AHT20.
#[derive(Debug, Clone)]
struct SimulatedAht20 {
    /// Fixed climate, or `None` for a slowly drifting one.
    fixed: Option<Reading>,
    /// Whether the calibration command is honoured.
    calibratable: bool,
    /// Whether measurements never complete.
    stuck_busy: bool,
    calibrated: bool,
    measuring: bool,
    measurements: u64,
}

impl SimulatedAht20 {
    fn new() -> Self {
        Self {
            fixed: None,
            calibratable: true,
            stuck_busy: false,
            calibrated: false,
            measuring: false,
            measurements: 0,
        }
    }

    fn status(&self) -> u8 {
        let mut status = 0x10;
        if self.calibrated {
            status |= STATUS_CALIBRATED;
        }
        if self.stuck_busy && self.measuring {
            status |= STATUS_BUSY;
        }
        status
    }

    fn command(&mut self, bytes: &[u8]) -> Result<(), ErrorKind> {
        match bytes {
            [CMD_SOFT_RESET] => {
                self.calibrated = false;
                self.measuring = false;
            }
            [a, b, c] if [*a, *b, *c] == CMD_CALIBRATE => {
                self.calibrated = self.calibratable;
            }
            [a, b, c] if [*a, *b, *c] == CMD_TRIGGER => {
                self.measuring = true;
                self.measurements += 1;
            }
            _ => return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data)),
        }
        Ok(())
    }

    fn climate(&self, channel: u8) -> Reading {
        if let Some(reading) = self.fixed {
            return reading;
        }

        let phase = self.measurements as f64 / 10.0 + f64::from(channel);
        Reading::new(
            21.0 + f64::from(channel) * 0.7 + 0.5 * phase.sin(),
            45.0 + f64::from(channel) * 2.5 + 2.0 * phase.cos(),
        )
    }

    fn respond(&mut self, channel: u8, buf: &mut [u8]) {
        if buf.len() > 1 && self.measuring && !self.stuck_busy {
            let frame = encode_frame(self.status(), &self.climate(channel));
            for (dst, src) in buf.iter_mut().zip(frame.iter()) {
                *dst = *src;
            }
            self.measuring = false;
        } else {
            buf.fill(0);
            buf[0] = self.status();
        }
    }
}

/// An in-process I2C bus with a multiplexer and AHT20 chips behind it.
#[derive(Debug, Clone)]
pub struct SimulatedBus {
    mux_address: u8,
    sensor_address: u8,
    /// Channel mask last written to the multiplexer.
    selected: u8,
    sensors: BTreeMap<u8, SimulatedAht20>,
}

impl SimulatedBus {
    /// A bus with a multiplexer and no sensors attached.
    pub fn new(mux_address: u8, sensor_address: u8) -> Self {
        Self {
            mux_address,
            sensor_address,
            selected: 0,
            sensors: BTreeMap::new(),
        }
    }

    /// Attach a sensor with a drifting climate on each given channel.
    pub fn with_sensors(mut self, channels: impl IntoIterator<Item = u8>) -> Self {
        for channel in channels {
            self.sensors.insert(channel, SimulatedAht20::new());
        }
        self
    }

    /// Attach a sensor on `channel` that always measures `reading`.
    pub fn with_fixed_reading(mut self, channel: u8, reading: Reading) -> Self {
        self.sensors
            .entry(channel)
            .or_insert_with(SimulatedAht20::new)
            .fixed = Some(reading);
        self
    }

    /// Attach a sensor on `channel` that never reports calibration.
    pub fn with_uncalibrated(mut self, channel: u8) -> Self {
        self.sensors
            .entry(channel)
            .or_insert_with(SimulatedAht20::new)
            .calibratable = false;
        self
    }

    /// Make the sensor on `channel` never finish a measurement.
    pub fn with_stuck_busy(mut self, channel: u8) -> Self {
        self.sensors
            .entry(channel)
            .or_insert_with(SimulatedAht20::new)
            .stuck_busy = true;
        self
    }

    fn nack() -> ErrorKind {
        ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)
    }

    /// The single sensor reachable through the current channel selection.
    fn selected_sensor(&mut self) -> Result<(u8, &mut SimulatedAht20), ErrorKind> {
        let selected = u32::from(self.selected);
        let mut reachable = self
            .sensors
            .iter_mut()
            .filter(|(channel, _)| selected & (1u32 << **channel) != 0);

        match (reachable.next(), reachable.next()) {
            (Some((channel, sensor)), None) => Ok((*channel, sensor)),
            // Several chips answering on one address
            (Some(_), Some(_)) => Err(ErrorKind::ArbitrationLoss),
            (None, _) => Err(Self::nack()),
        }
    }

    fn write_bytes(&mut self, address: u8, bytes: &[u8]) -> Result<(), ErrorKind> {
        if address == self.mux_address {
            self.selected = bytes.first().copied().unwrap_or(0);
            return Ok(());
        }
        if address != self.sensor_address {
            return Err(Self::nack());
        }

        let (_, sensor) = self.selected_sensor()?;
        sensor.command(bytes)
    }

    fn read_bytes(&mut self, address: u8, buf: &mut [u8]) -> Result<(), ErrorKind> {
        if address == self.mux_address {
            buf.fill(self.selected);
            return Ok(());
        }
        if address != self.sensor_address || buf.is_empty() {
            return Err(Self::nack());
        }

        let (channel, sensor) = self.selected_sensor()?;
        sensor.respond(channel, buf);
        Ok(())
    }
}

impl ErrorType for SimulatedBus {
    type Error = ErrorKind;
}

impl I2c for SimulatedBus {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        for operation in operations {
            match operation {
                Operation::Write(bytes) => self.write_bytes(address, bytes)?,
                Operation::Read(buf) => self.read_bytes(address, buf)?,
            }
        }
        Ok(())
    }
}

/// Delay that returns at once: the simulated chips never need to settle.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDelay;

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}
