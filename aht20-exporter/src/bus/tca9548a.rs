//! TCA9548A 8-channel I2C multiplexer.

use embedded_hal::i2c::{ErrorType, I2c, Operation};
use embedded_hal_bus::i2c::MutexDevice;

use super::SharedBus;
use crate::sensor::SensorError;

/// Number of downstream channels on the multiplexer.
pub const CHANNEL_COUNT: usize = 8;

/// A TCA9548A on a shared bus.
pub struct Tca9548a<B: 'static> {
    bus: SharedBus<B>,
    address: u8,
}

impl<B: I2c + 'static> Tca9548a<B> {
    pub fn new(bus: SharedBus<B>, address: u8) -> Self {
        Self { bus, address }
    }

    /// Get a device on one downstream channel.
    pub fn channel(
        &self,
        index: usize,
    ) -> Result<MuxChannel<MutexDevice<'static, B>>, SensorError> {
        if index >= CHANNEL_COUNT {
            return Err(SensorError::InvalidChannel(index));
        }

        Ok(MuxChannel {
            i2c: MutexDevice::new(self.bus),
            mux_address: self.address,
            channel: index as u8,
        })
    }
}

/// One downstream channel of the multiplexer, usable as a plain I2C device.
///
/// Every transaction first selects the channel. Select and transfer are two
/// bus transactions: callers must not interleave channels between them,
/// which holds as long as sensors are driven from one thread at a time.
pub struct MuxChannel<I2C> {
    i2c: I2C,
    mux_address: u8,
    channel: u8,
}

impl<I2C> MuxChannel<I2C> {
    pub fn channel(&self) -> u8 {
        self.channel
    }
}

impl<I2C: I2c> ErrorType for MuxChannel<I2C> {
    type Error = I2C::Error;
}

impl<I2C: I2c> I2c for MuxChannel<I2C> {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        self.i2c.write(self.mux_address, &[1 << self.channel])?;
        self.i2c.transaction(address, operations)
    }
}
