//! Bus device proxy.
//!
//! Every sensor shares one I2C controller. [`BusProxy`] owns it, tracks which
//! device address the next transfer goes to, and maps bus errors into
//! [`BusError`] tagged with that address. Drivers never hold the bus
//! themselves; they borrow the proxy for the duration of one call.
//!
//! # Register helpers
//!
//! Two register conventions are used by the supported parts:
//! - 16-bit big-endian register index followed by big-endian data
//!   (time-of-flight rangers)
//! - 8-bit command byte followed by little-endian data (colour sensor)

use crate::error::BusError;
use embedded_hal::i2c::{Error as _, I2c};
use tracing::trace;

/// Owner of the shared I2C controller.
#[derive(Debug)]
pub struct BusProxy<I> {
    i2c: I,
    selected: Option<u8>,
}

impl<I: I2c> BusProxy<I> {
    /// Wrap an opened bus.
    pub fn new(i2c: I) -> Self {
        Self {
            i2c,
            selected: None,
        }
    }

    /// Address of the device most recently addressed, if any.
    pub fn selected(&self) -> Option<u8> {
        self.selected
    }

    /// Direct subsequent transfers at `address`.
    pub fn select(&mut self, address: u8) {
        if self.selected != Some(address) {
            trace!(address = format_args!("0x{:02x}", address), "Selecting bus device");
            self.selected = Some(address);
        }
    }

    /// Whether a device acknowledges a one-byte read at `address`.
    ///
    /// Any failure means "absent"; the selection still moves to `address`.
    pub fn probe(&mut self, address: u8) -> bool {
        self.select(address);
        let mut byte = [0u8; 1];
        let present = self.i2c.read(address, &mut byte).is_ok();
        trace!(
            address = format_args!("0x{:02x}", address),
            present,
            "Probed bus address"
        );
        present
    }

    /// Write raw bytes to `address`.
    pub fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), BusError> {
        self.select(address);
        self.i2c
            .write(address, bytes)
            .map_err(|e| bus_error(address, e))
    }

    /// Read raw bytes from `address`.
    pub fn read(&mut self, address: u8, buffer: &mut [u8]) -> Result<(), BusError> {
        self.select(address);
        self.i2c
            .read(address, buffer)
            .map_err(|e| bus_error(address, e))
    }

    /// Write then read without releasing the bus in between.
    pub fn write_read(
        &mut self,
        address: u8,
        bytes: &[u8],
        buffer: &mut [u8],
    ) -> Result<(), BusError> {
        self.select(address);
        self.i2c
            .write_read(address, bytes, buffer)
            .map_err(|e| bus_error(address, e))
    }

    /// Write one byte to a 16-bit register index.
    pub fn write_reg16_u8(&mut self, address: u8, register: u16, value: u8) -> Result<(), BusError> {
        let [hi, lo] = register.to_be_bytes();
        self.write(address, &[hi, lo, value])
    }

    /// Write a big-endian word to a 16-bit register index.
    pub fn write_reg16_u16(
        &mut self,
        address: u8,
        register: u16,
        value: u16,
    ) -> Result<(), BusError> {
        let [hi, lo] = register.to_be_bytes();
        let [v0, v1] = value.to_be_bytes();
        self.write(address, &[hi, lo, v0, v1])
    }

    /// Write a big-endian double word to a 16-bit register index.
    pub fn write_reg16_u32(
        &mut self,
        address: u8,
        register: u16,
        value: u32,
    ) -> Result<(), BusError> {
        let [hi, lo] = register.to_be_bytes();
        let [v0, v1, v2, v3] = value.to_be_bytes();
        self.write(address, &[hi, lo, v0, v1, v2, v3])
    }

    /// Write a run of bytes starting at a 16-bit register index.
    pub fn write_reg16_block(
        &mut self,
        address: u8,
        register: u16,
        values: &[u8],
    ) -> Result<(), BusError> {
        let mut frame = Vec::with_capacity(values.len() + 2);
        frame.extend_from_slice(&register.to_be_bytes());
        frame.extend_from_slice(values);
        self.write(address, &frame)
    }

    /// Read one byte from a 16-bit register index.
    pub fn read_reg16_u8(&mut self, address: u8, register: u16) -> Result<u8, BusError> {
        let mut value = [0u8; 1];
        self.write_read(address, &register.to_be_bytes(), &mut value)?;
        Ok(value[0])
    }

    /// Read a big-endian word from a 16-bit register index.
    pub fn read_reg16_u16(&mut self, address: u8, register: u16) -> Result<u16, BusError> {
        let mut value = [0u8; 2];
        self.write_read(address, &register.to_be_bytes(), &mut value)?;
        Ok(u16::from_be_bytes(value))
    }

    /// Write one byte to an 8-bit command register.
    pub fn write_reg8(&mut self, address: u8, command: u8, value: u8) -> Result<(), BusError> {
        self.write(address, &[command, value])
    }

    /// Read one byte from an 8-bit command register.
    pub fn read_reg8(&mut self, address: u8, command: u8) -> Result<u8, BusError> {
        let mut value = [0u8; 1];
        self.write_read(address, &[command], &mut value)?;
        Ok(value[0])
    }

    /// Read a little-endian word from an 8-bit command register.
    pub fn read_reg8_u16_le(&mut self, address: u8, command: u8) -> Result<u16, BusError> {
        let mut value = [0u8; 2];
        self.write_read(address, &[command], &mut value)?;
        Ok(u16::from_le_bytes(value))
    }

    /// Give the controller back.
    pub fn into_inner(self) -> I {
        self.i2c
    }
}

fn bus_error<E: embedded_hal::i2c::Error>(address: u8, error: E) -> BusError {
    BusError {
        address,
        kind: error.kind(),
    }
}
