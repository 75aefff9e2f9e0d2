//! AHT20 temperature and humidity sensor driver.
//!
//! Each sensor sits on its own TCA9548A channel at the same address.
//! Construction resets and calibrates the chip; every [`SensorHandle::read`]
//! triggers one measurement and waits for it.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use parking_lot::Mutex;
use tracing::debug;

use crate::bus::simulated::{NoDelay, SimulatedBus};
use crate::bus::tca9548a::Tca9548a;
use crate::bus::{self, SharedBus};
use crate::config::BusConfig;
use crate::sensor::{Reading, SensorError, SensorFactory, SensorHandle};

pub const CMD_SOFT_RESET: u8 = 0xBA;
pub const CMD_CALIBRATE: [u8; 3] = [0xBE, 0x08, 0x00];
pub const CMD_TRIGGER: [u8; 3] = [0xAC, 0x33, 0x00];

pub const STATUS_BUSY: u8 = 0x80;
pub const STATUS_CALIBRATED: u8 = 0x08;

/// Length of a measurement frame: status byte plus 5 data bytes.
pub const FRAME_LEN: usize = 6;

const RAW_SCALE: f64 = (1u32 << 20) as f64;
const RAW_MAX: u32 = (1 << 20) - 1;

/// Waits imposed by the chip, in milliseconds.
#[derive(Debug, Clone, Copy)]
pub struct Aht20Timing {
    /// After soft reset.
    pub reset_ms: u32,
    /// After the calibration command.
    pub calibrate_ms: u32,
    /// After triggering a measurement.
    pub measurement_ms: u32,
    /// Between two status polls while busy.
    pub busy_poll_ms: u32,
    /// Status polls before giving up with [`SensorError::Busy`].
    pub max_busy_polls: u32,
}

impl Default for Aht20Timing {
    fn default() -> Self {
        Self {
            reset_ms: 20,
            calibrate_ms: 10,
            measurement_ms: 80,
            busy_poll_ms: 10,
            max_busy_polls: 100,
        }
    }
}

/// Decode a measurement frame.
pub fn decode_frame(frame: &[u8; FRAME_LEN]) -> Reading {
    let raw_humidity =
        (u32::from(frame[1]) << 12) | (u32::from(frame[2]) << 4) | (u32::from(frame[3]) >> 4);
    let raw_temperature =
        (u32::from(frame[3] & 0x0F) << 16) | (u32::from(frame[4]) << 8) | u32::from(frame[5]);

    Reading::new(
        f64::from(raw_temperature) * 200.0 / RAW_SCALE - 50.0,
        f64::from(raw_humidity) * 100.0 / RAW_SCALE,
    )
}

/// Encode a reading into a measurement frame, as the chip would send it.
pub fn encode_frame(status: u8, reading: &Reading) -> [u8; FRAME_LEN] {
    let to_raw = |value: f64| (value * RAW_SCALE).round().clamp(0.0, f64::from(RAW_MAX)) as u32;
    let raw_humidity = to_raw(reading.humidity / 100.0);
    let raw_temperature = to_raw((reading.temperature + 50.0) / 200.0);

    [
        status,
        (raw_humidity >> 12) as u8,
        (raw_humidity >> 4) as u8,
        (((raw_humidity & 0x0F) << 4) | (raw_temperature >> 16)) as u8,
        (raw_temperature >> 8) as u8,
        raw_temperature as u8,
    ]
}

/// One AHT20 on an I2C device, typically a multiplexer channel.
pub struct Aht20<I2C, D> {
    i2c: I2C,
    delay: D,
    address: u8,
    timing: Aht20Timing,
}

impl<I2C: I2c, D: DelayNs> Aht20<I2C, D> {
    /// Reset and calibrate the sensor.
    pub fn new(
        i2c: I2C,
        delay: D,
        address: u8,
        timing: Aht20Timing,
    ) -> Result<Self, SensorError> {
        let mut sensor = Self {
            i2c,
            delay,
            address,
            timing,
        };
        sensor.init()?;
        Ok(sensor)
    }

    fn init(&mut self) -> Result<(), SensorError> {
        self.write(&[CMD_SOFT_RESET])?;
        self.delay.delay_ms(self.timing.reset_ms);

        self.write(&CMD_CALIBRATE)?;
        self.delay.delay_ms(self.timing.calibrate_ms);

        let status = self.wait_ready()?;
        if status & STATUS_CALIBRATED == 0 {
            return Err(SensorError::NotCalibrated);
        }

        debug!(
            address = format_args!("0x{:02x}", self.address),
            status = format_args!("0x{:02x}", status),
            "AHT20 initialized"
        );
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), SensorError> {
        self.i2c.write(self.address, bytes).map_err(SensorError::bus)
    }

    fn status(&mut self) -> Result<u8, SensorError> {
        let mut status = [0u8; 1];
        self.i2c
            .read(self.address, &mut status)
            .map_err(SensorError::bus)?;
        Ok(status[0])
    }

    /// Poll the status byte until the busy flag clears.
    fn wait_ready(&mut self) -> Result<u8, SensorError> {
        for attempt in 0..=self.timing.max_busy_polls {
            let status = self.status()?;
            if status & STATUS_BUSY == 0 {
                return Ok(status);
            }
            if attempt < self.timing.max_busy_polls {
                self.delay.delay_ms(self.timing.busy_poll_ms);
            }
        }
        Err(SensorError::Busy)
    }

    /// Trigger a measurement and read it back.
    pub fn measure(&mut self) -> Result<Reading, SensorError> {
        self.write(&CMD_TRIGGER)?;
        self.delay.delay_ms(self.timing.measurement_ms);

        let status = self.wait_ready()?;
        if status & STATUS_CALIBRATED == 0 {
            return Err(SensorError::NotCalibrated);
        }

        let mut frame = [0u8; FRAME_LEN];
        self.i2c
            .read(self.address, &mut frame)
            .map_err(SensorError::bus)?;
        if frame[0] & STATUS_BUSY != 0 {
            return Err(SensorError::Busy);
        }

        Ok(decode_frame(&frame))
    }
}

impl<I2C, D> SensorHandle for Aht20<I2C, D>
where
    I2C: I2c + Send,
    D: DelayNs + Send,
{
    fn read(&mut self) -> Result<Reading, SensorError> {
        self.measure()
    }
}

type BusOpener<B> = Box<dyn Fn() -> Result<B, SensorError> + Send + Sync>;

/// Builds [`Aht20`] handles, one per multiplexer channel.
///
/// The bus is opened on the first [`SensorFactory::create`] call, so asking
/// for zero sensors never touches it.
pub struct Aht20Factory<B: 'static, D> {
    mux_address: u8,
    sensor_address: u8,
    timing: Aht20Timing,
    new_delay: fn() -> D,
    open: BusOpener<B>,
    bus: Mutex<Option<SharedBus<B>>>,
}

impl<B, D> Aht20Factory<B, D>
where
    B: I2c + Send + 'static,
    D: DelayNs + Send + 'static,
{
    /// A factory opening its bus with `open`, each sensor getting a delay
    /// from `new_delay`.
    pub fn new(
        config: &BusConfig,
        new_delay: fn() -> D,
        open: impl Fn() -> Result<B, SensorError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            mux_address: config.mux_address,
            sensor_address: config.sensor_address,
            timing: Aht20Timing::default(),
            new_delay,
            open: Box::new(open),
            bus: Mutex::new(None),
        }
    }

    pub fn with_timing(mut self, timing: Aht20Timing) -> Self {
        self.timing = timing;
        self
    }

    fn bus(&self) -> Result<SharedBus<B>, SensorError> {
        let mut slot = self.bus.lock();
        if let Some(bus) = *slot {
            return Ok(bus);
        }

        let bus = bus::shared((self.open)()?);
        *slot = Some(bus);
        Ok(bus)
    }
}

impl Aht20Factory<SimulatedBus, NoDelay> {
    /// A factory over a simulated bus.
    pub fn simulated(config: &BusConfig, bus: SimulatedBus) -> Self {
        Self::new(config, || NoDelay, move || Ok(bus.clone()))
    }
}

impl<B, D> SensorFactory for Aht20Factory<B, D>
where
    B: I2c + Send + 'static,
    D: DelayNs + Send + 'static,
{
    fn create(&self, index: usize) -> Result<Box<dyn SensorHandle>, SensorError> {
        let mux = Tca9548a::new(self.bus()?, self.mux_address);
        let channel = mux.channel(index)?;
        let sensor = Aht20::new(
            channel,
            (self.new_delay)(),
            self.sensor_address,
            self.timing,
        )?;
        Ok(Box::new(sensor))
    }
}
