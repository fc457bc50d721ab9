//! TCS34725 RGBC colour sensor.
//!
//! The part sits at a fixed address (0x29) and cannot be moved, so it shares
//! the bus with the rangers only while no other device is awake at 0x29.
//!
//! Registers are reached through a command byte with bit 7 set; bit 5 selects
//! auto-increment for multi-byte reads. Channel data is little-endian.
//!
//! Published readings carry the clear-channel count in `distance_mm`, with
//! status 0 for a valid sample and 1 when the clear channel is saturated.

use crate::config::RangingSettings;
use crate::core::{Reading, SensorClass, FACTORY_DEFAULT_ADDRESS};
use crate::error::DriverError;
use crate::hardware::bus::BusProxy;
use crate::hardware::capabilities::{DriverResult, SensorDriver};
use embedded_hal::i2c::I2c;
use std::time::Duration;
use tracing::{debug, trace};

const COMMAND: u8 = 0x80;
const AUTO_INCREMENT: u8 = 0x20;

const ENABLE: u8 = 0x00;
const ATIME: u8 = 0x01;
const CONTROL: u8 = 0x0F;
const ID: u8 = 0x12;
const STATUS: u8 = 0x13;
const CDATAL: u8 = 0x14;

const ENABLE_PON: u8 = 0x01;
const ENABLE_AEN: u8 = 0x02;
const STATUS_AVALID: u8 = 0x01;

/// 43 integration cycles, about 103 ms.
const INTEGRATION_TIME: u8 = 0xD5;
/// 1x analog gain.
const GAIN_1X: u8 = 0x00;

const STATUS_VALID: u8 = 0;
const STATUS_SATURATED: u8 = 1;

/// Oscillator wake-up and ADC enable delay.
const POWER_SETTLE: Duration = Duration::from_millis(10);

/// Device IDs of the TCS34721/5 and TCS34723/7 variants.
const KNOWN_IDS: [u8; 2] = [0x44, 0x4D];

/// Colour sensor driver state.
#[derive(Debug)]
pub struct Tcs34725 {
    address: u8,
    integration_time: u8,
}

impl Default for Tcs34725 {
    fn default() -> Self {
        Self::new()
    }
}

impl Tcs34725 {
    /// Driver for a sensor at the fixed address.
    pub fn new() -> Self {
        Self {
            address: FACTORY_DEFAULT_ADDRESS,
            integration_time: INTEGRATION_TIME,
        }
    }

    /// Highest clear count before the channel saturates.
    fn saturation(&self) -> u16 {
        let cycles = 256 - u32::from(self.integration_time);
        (cycles * 1024).min(u32::from(u16::MAX)) as u16
    }
}

impl<I: I2c> SensorDriver<I> for Tcs34725 {
    fn class(&self) -> SensorClass {
        SensorClass::ColourSensor
    }

    fn address(&self) -> u8 {
        self.address
    }

    fn init(&mut self, bus: &mut BusProxy<I>, address: u8) -> DriverResult<()> {
        self.address = address;
        let id = bus.read_reg8(address, COMMAND | ID)?;
        if !KNOWN_IDS.contains(&id) {
            return Err(DriverError::UnexpectedId {
                expected: "0x44 or 0x4d",
                found: id,
            });
        }
        bus.write_reg8(address, COMMAND | ENABLE, ENABLE_PON)?;
        std::thread::sleep(POWER_SETTLE);
        debug!(address = format_args!("0x{:02x}", address), id, "TCS34725 powered on");
        Ok(())
    }

    fn set_address(&mut self, _bus: &mut BusProxy<I>, new_address: u8) -> DriverResult<()> {
        if new_address == self.address {
            Ok(())
        } else {
            Err(DriverError::Unsupported("colour sensor address is fixed"))
        }
    }

    fn configure(&mut self, bus: &mut BusProxy<I>, _ranging: &RangingSettings) -> DriverResult<()> {
        bus.write_reg8(self.address, COMMAND | ATIME, self.integration_time)?;
        bus.write_reg8(self.address, COMMAND | CONTROL, GAIN_1X)?;
        Ok(())
    }

    fn start(&mut self, bus: &mut BusProxy<I>) -> DriverResult<()> {
        bus.write_reg8(self.address, COMMAND | ENABLE, ENABLE_PON | ENABLE_AEN)?;
        std::thread::sleep(POWER_SETTLE);
        Ok(())
    }

    fn is_data_ready(&mut self, bus: &mut BusProxy<I>) -> DriverResult<bool> {
        let status = bus.read_reg8(self.address, COMMAND | STATUS)?;
        Ok(status & STATUS_AVALID != 0)
    }

    fn read(&mut self, bus: &mut BusProxy<I>) -> DriverResult<Reading> {
        let mut raw = [0u8; 8];
        bus.write_read(self.address, &[COMMAND | AUTO_INCREMENT | CDATAL], &mut raw)?;
        let clear = u16::from_le_bytes([raw[0], raw[1]]);
        trace!(
            clear,
            red = u16::from_le_bytes([raw[2], raw[3]]),
            green = u16::from_le_bytes([raw[4], raw[5]]),
            blue = u16::from_le_bytes([raw[6], raw[7]]),
            "Colour sample"
        );
        let status = if clear >= self.saturation() {
            STATUS_SATURATED
        } else {
            STATUS_VALID
        };
        Ok(Reading::Single {
            distance_mm: clear,
            status,
        })
    }

    fn stop(&mut self, bus: &mut BusProxy<I>) -> DriverResult<()> {
        bus.write_reg8(self.address, COMMAND | ENABLE, 0x00)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::i2c::{ErrorKind, ErrorType, NoAcknowledgeSource, Operation};

    struct FakeTcs {
        regs: [u8; 0x20],
        pointer: u8,
    }

    impl FakeTcs {
        fn new(id: u8, clear: u16) -> Self {
            let mut regs = [0u8; 0x20];
            regs[usize::from(ID)] = id;
            regs[usize::from(STATUS)] = STATUS_AVALID;
            regs[usize::from(CDATAL)..usize::from(CDATAL) + 2].copy_from_slice(&clear.to_le_bytes());
            regs[0x16] = 0x10;
            Self { regs, pointer: 0 }
        }
    }

    impl ErrorType for FakeTcs {
        type Error = ErrorKind;
    }

    impl I2c for FakeTcs {
        fn transaction(
            &mut self,
            address: u8,
            operations: &mut [Operation<'_>],
        ) -> Result<(), Self::Error> {
            if address != FACTORY_DEFAULT_ADDRESS {
                return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
            }
            for operation in operations {
                match operation {
                    Operation::Write(bytes) => {
                        let Some((&command, data)) = bytes.split_first() else {
                            continue;
                        };
                        assert!(command & COMMAND != 0, "command bit missing");
                        self.pointer = command & 0x1F;
                        for (offset, &value) in data.iter().enumerate() {
                            self.regs[usize::from(self.pointer) + offset] = value;
                        }
                    }
                    Operation::Read(buffer) => {
                        for (offset, slot) in buffer.iter_mut().enumerate() {
                            *slot = self.regs[usize::from(self.pointer) + offset];
                        }
                    }
                }
            }
            Ok(())
        }
    }

    fn started(fake: FakeTcs) -> (BusProxy<FakeTcs>, Tcs34725) {
        let mut bus = BusProxy::new(fake);
        let mut driver = Tcs34725::new();
        driver.init(&mut bus, FACTORY_DEFAULT_ADDRESS).unwrap();
        driver.configure(&mut bus, &RangingSettings::default()).unwrap();
        driver.start(&mut bus).unwrap();
        (bus, driver)
    }

    #[test]
    fn test_bring_up_programs_timing_and_gain() {
        let (bus, _driver) = started(FakeTcs::new(0x44, 100));
        let fake = bus.into_inner();
        assert_eq!(fake.regs[usize::from(ENABLE)], ENABLE_PON | ENABLE_AEN);
        assert_eq!(fake.regs[usize::from(ATIME)], 0xD5);
        assert_eq!(fake.regs[usize::from(CONTROL)], GAIN_1X);
    }

    #[test]
    fn test_unknown_id_is_rejected() {
        let mut bus = BusProxy::new(FakeTcs::new(0x00, 0));
        let mut driver = Tcs34725::new();
        assert!(matches!(
            driver.init(&mut bus, FACTORY_DEFAULT_ADDRESS),
            Err(DriverError::UnexpectedId { found: 0x00, .. })
        ));
    }

    #[test]
    fn test_read_reports_clear_channel() {
        let (mut bus, mut driver) = started(FakeTcs::new(0x4D, 1500));
        assert!(driver.is_data_ready(&mut bus).unwrap());
        assert_eq!(
            driver.read(&mut bus).unwrap(),
            Reading::Single {
                distance_mm: 1500,
                status: STATUS_VALID
            }
        );
    }

    #[test]
    fn test_saturated_clear_channel_is_flagged() {
        let (mut bus, mut driver) = started(FakeTcs::new(0x44, 44_032));
        assert_eq!(
            driver.read(&mut bus).unwrap(),
            Reading::Single {
                distance_mm: 44_032,
                status: STATUS_SATURATED
            }
        );
    }

    #[test]
    fn test_address_is_fixed() {
        let (mut bus, mut driver) = started(FakeTcs::new(0x44, 0));
        assert!(driver.set_address(&mut bus, FACTORY_DEFAULT_ADDRESS).is_ok());
        assert!(matches!(
            driver.set_address(&mut bus, 0x30),
            Err(DriverError::Unsupported(_))
        ));
    }

    #[test]
    fn test_stop_powers_down() {
        let (mut bus, mut driver) = started(FakeTcs::new(0x44, 0));
        driver.stop(&mut bus).unwrap();
        assert_eq!(bus.into_inner().regs[usize::from(ENABLE)], 0x00);
    }
}
