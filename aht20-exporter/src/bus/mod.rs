//! I2C bus access.
//!
//! Drivers are written against `embedded_hal::i2c::I2c`. The bus behind
//! them is either the Raspberry Pi I2C controller (`rppal`, Linux only) or
//! the in-process [`simulated`] bus.
//!
//! - [`simulated`] - in-process multiplexer and AHT20 chips
//! - [`tca9548a`] - channel selection on the multiplexer

pub mod simulated;
pub mod tca9548a;

use std::sync::Mutex;

use crate::aht20::Aht20Factory;
use crate::config::BusConfig;
use crate::sensor::{SensorError, SensorFactory};

/// A bus shared by every sensor behind the multiplexer.
///
/// Opened once and kept for the life of the process. Sensors reach it
/// through `embedded_hal_bus::i2c::MutexDevice`.
pub type SharedBus<B> = &'static Mutex<B>;

/// Move a bus into shared storage.
pub fn shared<B: Send + 'static>(bus: B) -> SharedBus<B> {
    Box::leak(Box::new(Mutex::new(bus)))
}

/// Sensor factory for the bus described by the configuration.
///
/// Nothing is opened until the first sensor is created.
pub fn sensor_factory(config: &BusConfig) -> Box<dyn SensorFactory + Send + Sync> {
    if config.simulate {
        let bus = simulated::SimulatedBus::new(config.mux_address, config.sensor_address)
            .with_sensors(0..tca9548a::CHANNEL_COUNT as u8);
        return Box::new(Aht20Factory::simulated(config, bus));
    }

    device_factory(config)
}

#[cfg(target_os = "linux")]
fn device_factory(config: &BusConfig) -> Box<dyn SensorFactory + Send + Sync> {
    use rppal::hal::Delay;
    use rppal::i2c::I2c;

    let adapter = config.adapter;
    Box::new(Aht20Factory::new(config, Delay::new, move || {
        I2c::with_bus(adapter)
            .map_err(|e| SensorError::Unavailable(format!("/dev/i2c-{}: {}", adapter, e)))
    }))
}

#[cfg(not(target_os = "linux"))]
fn device_factory(config: &BusConfig) -> Box<dyn SensorFactory + Send + Sync> {
    Box::new(NoBus(format!(
        "/dev/i2c-{} requires Linux",
        config.adapter
    )))
}

/// Fails every sensor: there is no I2C controller on this platform.
#[cfg(not(target_os = "linux"))]
struct NoBus(String);

#[cfg(not(target_os = "linux"))]
impl SensorFactory for NoBus {
    fn create(
        &self,
        _index: usize,
    ) -> Result<Box<dyn crate::sensor::SensorHandle>, SensorError> {
        Err(SensorError::Unavailable(self.0.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_adapter_is_unavailable() {
        let config = BusConfig {
            adapter: 250,
            ..Default::default()
        };
        let factory = sensor_factory(&config);

        let err = factory.create(0).err().unwrap();
        assert!(matches!(err, SensorError::Unavailable(_)));
        assert!(err.to_string().contains("/dev/i2c-250"));
    }

    #[test]
    fn test_simulated_factory_has_every_channel() {
        let config = BusConfig {
            simulate: true,
            ..Default::default()
        };
        let factory = sensor_factory(&config);

        for index in 0..tca9548a::CHANNEL_COUNT {
            let mut sensor = factory.create(index).unwrap();
            assert!(sensor.read().is_ok(), "sensor{}", index);
        }
        assert!(matches!(
            factory.create(tca9548a::CHANNEL_COUNT).err(),
            Some(SensorError::InvalidChannel(8))
        ));
    }
}
