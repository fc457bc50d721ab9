//! VL53L1X single-zone time-of-flight ranger.
//!
//! Native register-level driver. The part uses 16-bit register indices and
//! big-endian data. Bring-up follows the vendor ultra-lite sequence:
//!
//! 1. poll `FIRMWARE__SYSTEM_STATUS` until the part reports booted
//! 2. load the default configuration block into `0x2D..=0x87`
//! 3. run one measurement to complete VHV calibration, then stop
//! 4. apply distance mode, timing budget, and inter-measurement period
//!
//! Readiness is signalled on GPIO1; its level is mirrored in
//! `GPIO__TIO_HV_STATUS` bit 0 and compared against the configured
//! interrupt polarity.

use crate::config::{DistanceMode, RangingSettings};
use crate::core::{Reading, SensorClass, FACTORY_DEFAULT_ADDRESS};
use crate::error::DriverError;
use crate::hardware::bus::BusProxy;
use crate::hardware::capabilities::{DriverResult, SensorDriver};
use embedded_hal::i2c::I2c;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

// Register map
const I2C_SLAVE_DEVICE_ADDRESS: u16 = 0x0001;
const VHV_CONFIG_TIMEOUT_MACROP_LOOP_BOUND: u16 = 0x0008;
const VHV_CONFIG_INIT: u16 = 0x000B;
const GPIO_HV_MUX_CTRL: u16 = 0x0030;
const GPIO_TIO_HV_STATUS: u16 = 0x0031;
const PHASECAL_CONFIG_TIMEOUT_MACROP: u16 = 0x004B;
const RANGE_CONFIG_TIMEOUT_MACROP_A_HI: u16 = 0x005E;
const RANGE_CONFIG_VCSEL_PERIOD_A: u16 = 0x0060;
const RANGE_CONFIG_TIMEOUT_MACROP_B_HI: u16 = 0x0061;
const RANGE_CONFIG_VCSEL_PERIOD_B: u16 = 0x0063;
const RANGE_CONFIG_VALID_PHASE_HIGH: u16 = 0x0069;
const SYSTEM_INTERMEASUREMENT_PERIOD: u16 = 0x006C;
const SD_CONFIG_WOI_SD0: u16 = 0x0078;
const SD_CONFIG_INITIAL_PHASE_SD0: u16 = 0x007A;
const SYSTEM_INTERRUPT_CLEAR: u16 = 0x0086;
const SYSTEM_MODE_START: u16 = 0x0087;
const RESULT_RANGE_STATUS: u16 = 0x0089;
const RESULT_FINAL_RANGE_MM_SD0: u16 = 0x0096;
const RESULT_OSC_CALIBRATE_VAL: u16 = 0x00DE;
const FIRMWARE_SYSTEM_STATUS: u16 = 0x00E5;

const MODE_START_CONTINUOUS: u8 = 0x40;
const MODE_STOP: u8 = 0x00;

/// First register of the default configuration block.
const DEFAULT_CONFIGURATION_START: u16 = 0x002D;

/// Default configuration for registers `0x2D..=0x87`.
const DEFAULT_CONFIGURATION: [u8; 91] = [
    0x00, // 0x2d : fast plus mode off
    0x00, // 0x2e : I2C pulled up at 1.8V
    0x00, // 0x2f : GPIO pulled up at 1.8V
    0x01, // 0x30 : interrupt active high
    0x02, // 0x31
    0x00, 0x02, 0x08, 0x00, 0x08, 0x10, 0x01, 0x01, 0x00, 0x00, 0x00, 0x00, 0xff, 0x00,
    0x0F, 0x00, 0x00, 0x00, 0x00, 0x00, // 0x32..=0x45
    0x20, // 0x46 : interrupt on new sample ready
    0x0b, 0x00, 0x00, 0x02, 0x0a, 0x21, 0x00, 0x00, 0x05, 0x00, 0x00, 0x00, 0x00, 0xc8,
    0x00, 0x00, 0x38, 0xff, 0x01, 0x00, 0x08, 0x00, 0x00, 0x01, 0xcc, 0x0f, 0x01, 0xf1,
    0x0d, // 0x47..=0x63
    0x01, 0x68, // 0x64..=0x65 : sigma threshold
    0x00, 0x80, // 0x66..=0x67 : min count rate
    0x08, 0xb8, 0x00, 0x00, // 0x68..=0x6b
    0x00, 0x00, 0x0f, 0x89, // 0x6c..=0x6f : inter-measurement period
    0x00, 0x00, // 0x70..=0x71
    0x00, 0x00, 0x00, 0x00, // 0x72..=0x75 : distance thresholds
    0x00, 0x01, 0x0f, 0x0d, 0x0e, 0x0e, 0x00, 0x00, 0x02, // 0x76..=0x7e
    0xc7, // 0x7f : ROI centre
    0xff, // 0x80 : ROI size
    0x9B, 0x00, 0x00, 0x00, 0x01, // 0x81..=0x85
    0x01, // 0x86 : clear interrupt
    0x00, // 0x87 : ranging stopped
];

/// Vendor range status for each raw `RESULT__RANGE_STATUS` value.
const RANGE_STATUS_MAP: [u8; 24] = [
    255, 255, 255, 5, 2, 4, 1, 7, 3, 0, 255, 255, 9, 13, 255, 255, 255, 255, 10, 6, 255, 255,
    11, 12,
];

/// Post-boot settle before the configuration block is loaded.
const BOOT_SETTLE: Duration = Duration::from_millis(100);
const BOOT_POLL: Duration = Duration::from_millis(2);
const READY_POLL: Duration = Duration::from_millis(1);

/// Single-zone ranger driver state.
#[derive(Debug)]
pub struct Vl53l1x {
    address: u8,
    boot_timeout: Duration,
    distance_mode: DistanceMode,
}

impl Vl53l1x {
    /// Driver that waits at most `boot_timeout` for boot and calibration.
    pub fn new(boot_timeout: Duration) -> Self {
        Self {
            address: FACTORY_DEFAULT_ADDRESS,
            boot_timeout,
            distance_mode: DistanceMode::Long,
        }
    }

    fn wait_for_boot<I: I2c>(&self, bus: &mut BusProxy<I>) -> DriverResult<()> {
        let started = Instant::now();
        loop {
            // The part may NACK while it is still coming out of reset.
            if let Ok(state) = bus.read_reg16_u8(self.address, FIRMWARE_SYSTEM_STATUS) {
                if state != 0 {
                    trace!(address = self.address, state, "Device booted");
                    return Ok(());
                }
            }
            if started.elapsed() >= self.boot_timeout {
                return Err(DriverError::BootTimeout {
                    waited_ms: self.boot_timeout.as_millis() as u64,
                });
            }
            std::thread::sleep(BOOT_POLL);
        }
    }

    fn wait_for_data<I: I2c>(&self, bus: &mut BusProxy<I>) -> DriverResult<()> {
        let started = Instant::now();
        while !self.data_ready(bus)? {
            if started.elapsed() >= self.boot_timeout {
                return Err(DriverError::DataReadyTimeout {
                    waited_ms: self.boot_timeout.as_millis() as u64,
                });
            }
            std::thread::sleep(READY_POLL);
        }
        Ok(())
    }

    fn data_ready<I: I2c>(&self, bus: &mut BusProxy<I>) -> DriverResult<bool> {
        let mux = bus.read_reg16_u8(self.address, GPIO_HV_MUX_CTRL)?;
        let polarity = u8::from(mux & 0x10 == 0);
        let status = bus.read_reg16_u8(self.address, GPIO_TIO_HV_STATUS)?;
        Ok(status & 0x01 == polarity)
    }

    fn clear_interrupt<I: I2c>(&self, bus: &mut BusProxy<I>) -> DriverResult<()> {
        bus.write_reg16_u8(self.address, SYSTEM_INTERRUPT_CLEAR, 0x01)?;
        Ok(())
    }

    fn set_distance_mode<I: I2c>(
        &mut self,
        bus: &mut BusProxy<I>,
        mode: DistanceMode,
    ) -> DriverResult<()> {
        let (phasecal, vcsel_a, vcsel_b, valid_phase, woi, initial_phase) = match mode {
            DistanceMode::Short => (0x14, 0x07, 0x05, 0x38, 0x0705, 0x0606),
            DistanceMode::Long => (0x0A, 0x0F, 0x0D, 0xB8, 0x0F0D, 0x0E0E),
        };
        let a = self.address;
        bus.write_reg16_u8(a, PHASECAL_CONFIG_TIMEOUT_MACROP, phasecal)?;
        bus.write_reg16_u8(a, RANGE_CONFIG_VCSEL_PERIOD_A, vcsel_a)?;
        bus.write_reg16_u8(a, RANGE_CONFIG_VCSEL_PERIOD_B, vcsel_b)?;
        bus.write_reg16_u8(a, RANGE_CONFIG_VALID_PHASE_HIGH, valid_phase)?;
        bus.write_reg16_u16(a, SD_CONFIG_WOI_SD0, woi)?;
        bus.write_reg16_u16(a, SD_CONFIG_INITIAL_PHASE_SD0, initial_phase)?;
        self.distance_mode = mode;
        Ok(())
    }

    fn set_timing_budget<I: I2c>(&self, bus: &mut BusProxy<I>, budget_ms: u16) -> DriverResult<()> {
        let (a_hi, b_hi) = timing_budget_registers(self.distance_mode, budget_ms).ok_or_else(|| {
            DriverError::InvalidParameter(format!(
                "timing budget {} ms is not available in {:?} mode",
                budget_ms, self.distance_mode
            ))
        })?;
        bus.write_reg16_u16(self.address, RANGE_CONFIG_TIMEOUT_MACROP_A_HI, a_hi)?;
        bus.write_reg16_u16(self.address, RANGE_CONFIG_TIMEOUT_MACROP_B_HI, b_hi)?;
        Ok(())
    }

    fn set_inter_measurement<I: I2c>(
        &self,
        bus: &mut BusProxy<I>,
        period_ms: u32,
    ) -> DriverResult<()> {
        let clock_pll = u64::from(bus.read_reg16_u16(self.address, RESULT_OSC_CALIBRATE_VAL)? & 0x03FF);
        // period register counts oscillator ticks, with a 7.5% guard band
        let ticks = clock_pll * u64::from(period_ms) * 1075 / 1000;
        let ticks = u32::try_from(ticks).map_err(|_| {
            DriverError::InvalidParameter(format!("inter-measurement period {} ms", period_ms))
        })?;
        bus.write_reg16_u32(self.address, SYSTEM_INTERMEASUREMENT_PERIOD, ticks)?;
        Ok(())
    }
}

/// Timeout macro-period register values for a supported timing budget.
fn timing_budget_registers(mode: DistanceMode, budget_ms: u16) -> Option<(u16, u16)> {
    match (mode, budget_ms) {
        (DistanceMode::Short, 15) => Some((0x001D, 0x0027)),
        (DistanceMode::Short, 20) => Some((0x0051, 0x006E)),
        (DistanceMode::Short, 33) => Some((0x00D6, 0x006E)),
        (DistanceMode::Short, 50) => Some((0x01AE, 0x01E8)),
        (DistanceMode::Short, 100) => Some((0x02E1, 0x0388)),
        (DistanceMode::Short, 200) => Some((0x03E1, 0x0496)),
        (DistanceMode::Short, 500) => Some((0x0591, 0x05C1)),
        (DistanceMode::Long, 20) => Some((0x001E, 0x0022)),
        (DistanceMode::Long, 33) => Some((0x0060, 0x006E)),
        (DistanceMode::Long, 50) => Some((0x00AD, 0x00C6)),
        (DistanceMode::Long, 100) => Some((0x01CC, 0x01EA)),
        (DistanceMode::Long, 200) => Some((0x02D9, 0x02F8)),
        (DistanceMode::Long, 500) => Some((0x048F, 0x04A4)),
        _ => None,
    }
}

impl<I: I2c> SensorDriver<I> for Vl53l1x {
    fn class(&self) -> SensorClass {
        SensorClass::SingleZoneRanger
    }

    fn address(&self) -> u8 {
        self.address
    }

    fn init(&mut self, bus: &mut BusProxy<I>, address: u8) -> DriverResult<()> {
        self.address = address;
        self.wait_for_boot(bus)?;
        std::thread::sleep(BOOT_SETTLE);

        bus.write_reg16_block(address, DEFAULT_CONFIGURATION_START, &DEFAULT_CONFIGURATION)?;

        // One throwaway measurement completes VHV calibration
        bus.write_reg16_u8(address, SYSTEM_MODE_START, MODE_START_CONTINUOUS)?;
        self.wait_for_data(bus)?;
        self.clear_interrupt(bus)?;
        bus.write_reg16_u8(address, SYSTEM_MODE_START, MODE_STOP)?;
        bus.write_reg16_u8(address, VHV_CONFIG_TIMEOUT_MACROP_LOOP_BOUND, 0x09)?;
        bus.write_reg16_u8(address, VHV_CONFIG_INIT, 0x00)?;

        debug!(address = format_args!("0x{:02x}", address), "VL53L1X initialized");
        Ok(())
    }

    fn set_address(&mut self, bus: &mut BusProxy<I>, new_address: u8) -> DriverResult<()> {
        bus.write_reg16_u8(self.address, I2C_SLAVE_DEVICE_ADDRESS, new_address & 0x7F)?;
        self.address = new_address;
        Ok(())
    }

    fn configure(&mut self, bus: &mut BusProxy<I>, ranging: &RangingSettings) -> DriverResult<()> {
        self.set_distance_mode(bus, ranging.distance_mode)?;
        self.set_timing_budget(bus, ranging.timing_budget_ms)?;
        self.set_inter_measurement(bus, ranging.inter_measurement_ms)?;
        Ok(())
    }

    fn start(&mut self, bus: &mut BusProxy<I>) -> DriverResult<()> {
        bus.write_reg16_u8(self.address, SYSTEM_MODE_START, MODE_START_CONTINUOUS)?;
        Ok(())
    }

    fn is_data_ready(&mut self, bus: &mut BusProxy<I>) -> DriverResult<bool> {
        self.data_ready(bus)
    }

    fn read(&mut self, bus: &mut BusProxy<I>) -> DriverResult<Reading> {
        let raw = bus.read_reg16_u8(self.address, RESULT_RANGE_STATUS)? & 0x1F;
        let status = RANGE_STATUS_MAP
            .get(usize::from(raw))
            .copied()
            .unwrap_or(255);
        let distance_mm = bus.read_reg16_u16(self.address, RESULT_FINAL_RANGE_MM_SD0)?;
        self.clear_interrupt(bus)?;
        Ok(Reading::Single {
            distance_mm,
            status,
        })
    }

    fn stop(&mut self, bus: &mut BusProxy<I>) -> DriverResult<()> {
        bus.write_reg16_u8(self.address, SYSTEM_MODE_START, MODE_STOP)?;
        Ok(())
    }
}
