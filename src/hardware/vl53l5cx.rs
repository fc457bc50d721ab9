//! VL53L5CX multi-zone time-of-flight ranger.
//!
//! Safe wrapper over the ST ultra-lite driver from `vl53l5cx-sys`. The vendor
//! driver keeps all device state in a `VL53L5CX_Configuration` block that this
//! driver allocates on the heap and owns; the block is the session's device
//! state and is freed when the driver is dropped.
//!
//! The vendor platform layer performs its own transfers on a descriptor stored
//! in the configuration block, so this driver opens the bus device a second
//! time. Addresses are 7-bit everywhere else in the crate; the vendor API
//! takes 8-bit addresses, and the shift happens here only.

use crate::config::RangingSettings;
use crate::core::{Reading, SensorClass, ZoneFrame, FACTORY_DEFAULT_ADDRESS, MAX_ZONES};
use crate::error::DriverError;
use crate::hardware::bus::BusProxy;
use crate::hardware::capabilities::{DriverResult, SensorDriver};
use embedded_hal::i2c::I2c;
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::debug;
use vl53l5cx_sys as sys;

/// Multi-zone ranger driver state.
pub struct Vl53l5cx {
    i2c_bus: PathBuf,
    address: u8,
    resolution: u8,
    device: Option<Box<sys::VL53L5CX_Configuration>>,
    results: Box<sys::VL53L5CX_ResultsData>,
    // Keeps the descriptor stored in `device.platform.fd` open.
    file: Option<File>,
}

// SAFETY: the configuration block holds raw pointers into vendor firmware
// tables and a file descriptor. Both are only touched through `&mut self`,
// so moving the driver to another thread cannot race.
#[allow(unsafe_code)]
unsafe impl Send for Vl53l5cx {}

impl Vl53l5cx {
    /// Driver for a sensor on the bus at `i2c_bus`.
    pub fn new(i2c_bus: &Path) -> Self {
        Self {
            i2c_bus: i2c_bus.to_path_buf(),
            address: FACTORY_DEFAULT_ADDRESS,
            resolution: 0,
            device: None,
            // SAFETY: plain-old-data results block, all-zero is a valid value.
            results: Box::new(unsafe { std::mem::zeroed() }),
            file: None,
        }
    }

    fn device(&mut self) -> DriverResult<&mut sys::VL53L5CX_Configuration> {
        self.device.as_deref_mut().ok_or(DriverError::Released)
    }
}

fn check(operation: &'static str, status: u8) -> DriverResult<()> {
    if status == 0 {
        Ok(())
    } else {
        Err(DriverError::Vendor { operation, status })
    }
}

fn to_8bit(address: u8) -> u16 {
    u16::from(address) << 1
}

#[allow(unsafe_code)]
impl<I: I2c> SensorDriver<I> for Vl53l5cx {
    fn class(&self) -> SensorClass {
        SensorClass::MultiZoneRanger
    }

    fn address(&self) -> u8 {
        self.address
    }

    fn init(&mut self, bus: &mut BusProxy<I>, address: u8) -> DriverResult<()> {
        bus.select(address);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.i2c_bus)?;

        // SAFETY: the configuration block is plain data; the vendor init fills it.
        let mut device: Box<sys::VL53L5CX_Configuration> = Box::new(unsafe { std::mem::zeroed() });
        device.platform.fd = file.as_raw_fd();
        device.platform.address = to_8bit(address);

        let mut alive = 0u8;
        // SAFETY: `device` is a live, exclusively borrowed configuration block.
        check("is_alive", unsafe { sys::vl53l5cx_is_alive(&mut *device, &mut alive) })?;
        if alive == 0 {
            return Err(DriverError::Vendor {
                operation: "is_alive",
                status: 0,
            });
        }
        // SAFETY: as above; the block stays boxed at a fixed address from here on.
        check("init", unsafe { sys::vl53l5cx_init(&mut *device) })?;

        self.address = address;
        self.device = Some(device);
        self.file = Some(file);
        debug!(address = format_args!("0x{:02x}", address), "VL53L5CX initialized");
        Ok(())
    }

    fn set_address(&mut self, bus: &mut BusProxy<I>, new_address: u8) -> DriverResult<()> {
        let device = self.device()?;
        // SAFETY: exclusive access to the initialized block.
        check("set_i2c_address", unsafe {
            sys::vl53l5cx_set_i2c_address(device, to_8bit(new_address))
        })?;
        self.address = new_address;
        bus.select(new_address);
        Ok(())
    }

    fn configure(&mut self, _bus: &mut BusProxy<I>, ranging: &RangingSettings) -> DriverResult<()> {
        let device = self.device()?;
        // SAFETY: exclusive access to the initialized block.
        check("set_resolution", unsafe {
            sys::vl53l5cx_set_resolution(device, ranging.zone_resolution)
        })?;
        // SAFETY: as above.
        check("set_ranging_frequency_hz", unsafe {
            sys::vl53l5cx_set_ranging_frequency_hz(device, ranging.ranging_frequency_hz)
        })?;
        self.resolution = ranging.zone_resolution;
        Ok(())
    }

    fn start(&mut self, _bus: &mut BusProxy<I>) -> DriverResult<()> {
        let device = self.device()?;
        // SAFETY: exclusive access to the initialized block.
        check("start_ranging", unsafe { sys::vl53l5cx_start_ranging(device) })
    }

    fn is_data_ready(&mut self, _bus: &mut BusProxy<I>) -> DriverResult<bool> {
        let device = self.device()?;
        let mut ready = 0u8;
        // SAFETY: exclusive access to the initialized block.
        check("check_data_ready", unsafe {
            sys::vl53l5cx_check_data_ready(device, &mut ready)
        })?;
        Ok(ready != 0)
    }

    fn current_resolution(&mut self, _bus: &mut BusProxy<I>) -> DriverResult<u8> {
        let device = self.device()?;
        let mut resolution = 0u8;
        // SAFETY: exclusive access to the initialized block.
        check("get_resolution", unsafe {
            sys::vl53l5cx_get_resolution(device, &mut resolution)
        })?;
        self.resolution = resolution;
        Ok(resolution)
    }

    fn read(&mut self, _bus: &mut BusProxy<I>) -> DriverResult<Reading> {
        let device = self
            .device
            .as_deref_mut()
            .ok_or(DriverError::Released)?;
        // SAFETY: both blocks are live and exclusively borrowed.
        check("get_ranging_data", unsafe {
            sys::vl53l5cx_get_ranging_data(device, &mut *self.results)
        })?;

        let mut frame = ZoneFrame::new(self.resolution);
        let targets = sys::VL53L5CX_NB_TARGET_PER_ZONE as usize;
        let zones = usize::from(self.resolution).min(MAX_ZONES);
        for zone in 0..zones {
            frame.distances[zone] = self.results.distance_mm[zone * targets].max(0) as u16;
            frame.statuses[zone] = self.results.target_status[zone * targets];
        }
        Ok(Reading::Matrix(Box::new(frame)))
    }

    fn stop(&mut self, _bus: &mut BusProxy<I>) -> DriverResult<()> {
        let device = self.device()?;
        // SAFETY: exclusive access to the initialized block.
        check("stop_ranging", unsafe { sys::vl53l5cx_stop_ranging(device) })
    }
}
