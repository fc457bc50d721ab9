//! Simulated board for running without sensors attached.
//!
//! Provides a bus, enable lines, and scripted devices that behave like the
//! real parts where address arbitration is concerned:
//!
//! - a device answers only while its enable line is high
//! - a freshly powered device answers at the factory-default address
//! - a readdressed device keeps its new address until it loses power
//!
//! # Available Mocks
//!
//! - `SimBoard` - shared board state; also a line provider and driver factory
//! - `SimBus` - `embedded_hal::i2c::I2c` that acknowledges powered devices
//! - `SimPin` - `embedded_hal::digital::OutputPin` for one enable line
//! - `SimDriver` - `SensorDriver` that produces synthetic readings
//!
//! # Example
//!
//! ```rust,ignore
//! let mut board = SimBoard::new();
//! let left = board.add_device(SimDeviceSpec::new(SensorClass::SingleZoneRanger, 4));
//! board.add_device(SimDeviceSpec::new(SensorClass::SingleZoneRanger, 5).failing_address_change());
//!
//! let acquisition = app::bring_up(&settings, &entries, board.bus(), &mut board.clone(), &board)?;
//! assert_eq!(board.device_address(left), Some(0x30));
//! ```

use crate::config::sensor_list::SensorEntry;
use crate::config::RangingSettings;
use crate::core::{Reading, SensorClass, ZoneFrame, FACTORY_DEFAULT_ADDRESS};
use crate::error::{AppResult, BusError, DriverError};
use crate::hardware::bus::BusProxy;
use crate::hardware::capabilities::{DriverResult, SensorDriver};
use crate::hardware::gpio::EnableLineProvider;
use crate::hardware::registry::DriverFactory;
use embedded_hal::i2c::{self, ErrorKind, NoAcknowledgeSource, Operation};
use embedded_hal::digital;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

// =============================================================================
// Device scripting
// =============================================================================

/// Behaviour of one simulated sensor.
#[derive(Debug, Clone)]
pub struct SimDeviceSpec {
    /// Sensor model.
    pub class: SensorClass,
    /// Enable line the device is wired to.
    pub enable_line: u8,
    /// Whether the device acknowledges anything at all.
    pub present: bool,
    /// Address answered on power-up. `None` means the factory default.
    pub power_on_address: Option<u8>,
    /// Reject every address change.
    pub fail_address_change: bool,
    /// Fail `init`.
    pub fail_init: bool,
    /// Fail `start`.
    pub fail_start: bool,
    /// Fail `stop`.
    pub fail_stop: bool,
    /// Number of upcoming reads that fail.
    pub failing_reads: u32,
    /// Zone count reported by multi-zone devices.
    pub resolution: u8,
}

impl SimDeviceSpec {
    /// A healthy device of `class` on `enable_line`.
    pub fn new(class: SensorClass, enable_line: u8) -> Self {
        Self {
            class,
            enable_line,
            present: true,
            power_on_address: None,
            fail_address_change: false,
            fail_init: false,
            fail_start: false,
            fail_stop: false,
            failing_reads: 0,
            resolution: if class.is_multi_zone() { 64 } else { 1 },
        }
    }

    /// Never acknowledges (unplugged or dead).
    pub fn absent(mut self) -> Self {
        self.present = false;
        self
    }

    /// Wakes up already at `address`, as after a warm restart.
    pub fn at_address(mut self, address: u8) -> Self {
        self.power_on_address = Some(address);
        self
    }

    /// Rejects address changes.
    pub fn failing_address_change(mut self) -> Self {
        self.fail_address_change = true;
        self
    }

    /// Fails initialization.
    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    /// Fails to start ranging.
    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Fails to stop ranging.
    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    /// Fails the next `count` reads.
    pub fn flaky_reads(mut self, count: u32) -> Self {
        self.failing_reads = count;
        self
    }

    /// Reports `resolution` zones.
    pub fn with_resolution(mut self, resolution: u8) -> Self {
        self.resolution = resolution;
        self
    }
}

#[derive(Debug)]
struct SimDevice {
    spec: SimDeviceSpec,
    powered: bool,
    address: u8,
    ranging: bool,
    samples: u32,
    stops: u32,
}

impl SimDevice {
    fn answers_at(&self, address: u8) -> bool {
        self.spec.present && self.powered && self.address == address
    }
}

#[derive(Debug, Default)]
struct BoardState {
    devices: Vec<SimDevice>,
    lines: BTreeMap<u8, bool>,
    stuck_low: HashSet<u8>,
    last_writes: HashMap<u8, Vec<u8>>,
}

impl BoardState {
    fn set_line(&mut self, line: u8, high: bool) {
        let was_high = self.lines.insert(line, high).unwrap_or(false);
        for device in self.devices.iter_mut().filter(|d| d.spec.enable_line == line) {
            if high && !was_high {
                device.powered = true;
                device.address = device
                    .spec
                    .power_on_address
                    .unwrap_or(FACTORY_DEFAULT_ADDRESS);
                device.ranging = false;
            } else if !high {
                device.powered = false;
                device.ranging = false;
            }
        }
    }

    fn responder(&self, address: u8) -> Option<usize> {
        self.devices.iter().position(|d| d.answers_at(address))
    }
}

// =============================================================================
// SimBoard
// =============================================================================

/// Shared simulated board.
///
/// Clones share state, so a test can keep one handle for inspection while
/// the daemon owns others.
#[derive(Debug, Clone, Default)]
pub struct SimBoard {
    state: Arc<Mutex<BoardState>>,
}

impl SimBoard {
    /// An empty board.
    pub fn new() -> Self {
        Self::default()
    }

    /// A board with one healthy device per sensor-list entry.
    pub fn from_entries(entries: &[SensorEntry]) -> Self {
        let board = Self::new();
        for entry in entries {
            let line = u8::try_from(entry.enable_line).unwrap_or(u8::MAX);
            board.add_device(SimDeviceSpec::new(entry.class, line));
        }
        board
    }

    /// Attach a device; returns its index.
    pub fn add_device(&self, spec: SimDeviceSpec) -> usize {
        let mut state = self.state.lock();
        let powered = state.lines.get(&spec.enable_line).copied().unwrap_or(false);
        let address = spec.power_on_address.unwrap_or(FACTORY_DEFAULT_ADDRESS);
        state.devices.push(SimDevice {
            spec,
            powered,
            address,
            ranging: false,
            samples: 0,
            stops: 0,
        });
        state.devices.len() - 1
    }

    /// A bus handle.
    pub fn bus(&self) -> SimBus {
        SimBus {
            state: Arc::clone(&self.state),
        }
    }

    /// Drive an enable line.
    pub fn set_line(&self, line: u8, high: bool) {
        self.state.lock().set_line(line, high);
    }

    /// Make `line` refuse to go high, like a broken level shifter.
    pub fn stick_line_low(&self, line: u8) {
        self.state.lock().stuck_low.insert(line);
    }

    /// Current level of an enable line.
    pub fn line(&self, line: u8) -> bool {
        self.state.lock().lines.get(&line).copied().unwrap_or(false)
    }

    /// Address a device answers at, or `None` while unpowered or absent.
    pub fn device_address(&self, index: usize) -> Option<u8> {
        let state = self.state.lock();
        state
            .devices
            .get(index)
            .filter(|d| d.spec.present && d.powered)
            .map(|d| d.address)
    }

    /// Whether a device is currently ranging.
    pub fn is_ranging(&self, index: usize) -> bool {
        self.state
            .lock()
            .devices
            .get(index)
            .map(|d| d.ranging)
            .unwrap_or(false)
    }

    /// How many times a device was told to stop.
    pub fn stop_count(&self, index: usize) -> u32 {
        self.state
            .lock()
            .devices
            .get(index)
            .map(|d| d.stops)
            .unwrap_or(0)
    }

    /// Change the zone count a device reports.
    pub fn set_resolution(&self, index: usize, resolution: u8) {
        if let Some(device) = self.state.lock().devices.get_mut(index) {
            device.spec.resolution = resolution;
        }
    }

    /// Make the next `count` reads of a device fail.
    pub fn fail_next_reads(&self, index: usize, count: u32) {
        if let Some(device) = self.state.lock().devices.get_mut(index) {
            device.spec.failing_reads = count;
        }
    }

    /// Number of devices acknowledging `address`.
    pub fn responders_at(&self, address: u8) -> usize {
        self.state
            .lock()
            .devices
            .iter()
            .filter(|d| d.answers_at(address))
            .count()
    }

    /// Last bytes written to `address`.
    pub fn last_write(&self, address: u8) -> Option<Vec<u8>> {
        self.state.lock().last_writes.get(&address).cloned()
    }

    fn with_device<T>(&self, index: usize, f: impl FnOnce(&mut SimDevice) -> T) -> Option<T> {
        self.state.lock().devices.get_mut(index).map(f)
    }
}

impl EnableLineProvider for SimBoard {
    type Pin = SimPin;

    fn claim(&mut self, line: u8) -> AppResult<SimPin> {
        self.set_line(line, false);
        Ok(SimPin {
            board: self.clone(),
            line,
        })
    }
}

impl DriverFactory<SimBus> for SimBoard {
    fn create(&self, class: SensorClass) -> DriverResult<Box<dyn SensorDriver<SimBus>>> {
        Ok(Box::new(SimDriver {
            board: self.clone(),
            class,
            device: None,
            address: FACTORY_DEFAULT_ADDRESS,
        }))
    }
}

// =============================================================================
// SimBus / SimPin
// =============================================================================

/// Simulated I2C controller.
#[derive(Debug, Clone)]
pub struct SimBus {
    state: Arc<Mutex<BoardState>>,
}

impl i2c::ErrorType for SimBus {
    type Error = ErrorKind;
}

impl i2c::I2c for SimBus {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let mut state = self.state.lock();
        if state.responder(address).is_none() {
            return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
        }
        for operation in operations {
            match operation {
                Operation::Write(bytes) => {
                    state.last_writes.insert(address, bytes.to_vec());
                }
                Operation::Read(buffer) => buffer.fill(0),
            }
        }
        Ok(())
    }
}

/// One simulated enable line.
#[derive(Debug, Clone)]
pub struct SimPin {
    board: SimBoard,
    line: u8,
}

impl digital::ErrorType for SimPin {
    type Error = digital::ErrorKind;
}

impl digital::OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.board.set_line(self.line, false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        let mut state = self.board.state.lock();
        if state.stuck_low.contains(&self.line) {
            return Err(digital::ErrorKind::Other);
        }
        state.set_line(self.line, true);
        Ok(())
    }
}

// =============================================================================
// SimDriver
// =============================================================================

/// Driver for simulated devices.
///
/// Bus traffic goes through the proxy so that a device which is not
/// acknowledging produces the same errors a real part would.
pub struct SimDriver {
    board: SimBoard,
    class: SensorClass,
    device: Option<usize>,
    address: u8,
}

impl SimDriver {
    fn device(&self) -> DriverResult<usize> {
        self.device.ok_or(DriverError::Released)
    }

    fn scripted_failure(&self) -> DriverError {
        DriverError::Bus(BusError {
            address: self.address,
            kind: ErrorKind::Other,
        })
    }
}

impl SensorDriver<SimBus> for SimDriver {
    fn class(&self) -> SensorClass {
        self.class
    }

    fn address(&self) -> u8 {
        self.address
    }

    fn init(&mut self, bus: &mut BusProxy<SimBus>, address: u8) -> DriverResult<()> {
        bus.write(address, &[0x00])?;
        let index = self
            .board
            .state
            .lock()
            .responder(address)
            .ok_or(DriverError::BootTimeout { waited_ms: 0 })?;
        self.device = Some(index);
        self.address = address;

        let fail = self
            .board
            .with_device(index, |d| d.spec.fail_init)
            .unwrap_or(true);
        if fail {
            return Err(DriverError::BootTimeout { waited_ms: 1000 });
        }
        Ok(())
    }

    fn set_address(&mut self, bus: &mut BusProxy<SimBus>, new_address: u8) -> DriverResult<()> {
        if !self.class.supports_readdressing() && new_address != self.address {
            return Err(DriverError::Unsupported("address change"));
        }
        let index = self.device()?;
        bus.write(self.address, &[0x01, new_address])?;
        let moved = self
            .board
            .with_device(index, |d| {
                if d.spec.fail_address_change {
                    false
                } else {
                    d.address = new_address;
                    true
                }
            })
            .unwrap_or(false);
        if !moved {
            return Err(self.scripted_failure());
        }
        self.address = new_address;
        Ok(())
    }

    fn configure(
        &mut self,
        bus: &mut BusProxy<SimBus>,
        _ranging: &RangingSettings,
    ) -> DriverResult<()> {
        self.device()?;
        bus.write(self.address, &[0x02])?;
        Ok(())
    }

    fn start(&mut self, bus: &mut BusProxy<SimBus>) -> DriverResult<()> {
        let index = self.device()?;
        bus.write(self.address, &[0x03])?;
        let started = self
            .board
            .with_device(index, |d| {
                if d.spec.fail_start {
                    false
                } else {
                    d.ranging = true;
                    true
                }
            })
            .unwrap_or(false);
        if started {
            Ok(())
        } else {
            Err(self.scripted_failure())
        }
    }

    fn is_data_ready(&mut self, bus: &mut BusProxy<SimBus>) -> DriverResult<bool> {
        let index = self.device()?;
        let mut status = [0u8; 1];
        bus.read(self.address, &mut status)?;
        Ok(self.board.with_device(index, |d| d.ranging).unwrap_or(false))
    }

    fn current_resolution(&mut self, bus: &mut BusProxy<SimBus>) -> DriverResult<u8> {
        let index = self.device()?;
        let mut status = [0u8; 1];
        bus.read(self.address, &mut status)?;
        Ok(self
            .board
            .with_device(index, |d| d.spec.resolution)
            .unwrap_or(0))
    }

    fn read(&mut self, bus: &mut BusProxy<SimBus>) -> DriverResult<Reading> {
        let index = self.device()?;
        let mut payload = [0u8; 2];
        bus.read(self.address, &mut payload)?;

        let sample = self
            .board
            .with_device(index, |d| {
                if d.spec.failing_reads > 0 {
                    d.spec.failing_reads -= 1;
                    None
                } else {
                    d.samples += 1;
                    Some((d.samples, d.spec.resolution))
                }
            })
            .flatten();
        let Some((sample, resolution)) = sample else {
            return Err(self.scripted_failure());
        };

        let value = (sample % 4000) as u16;
        if self.class.is_multi_zone() {
            let mut frame = ZoneFrame::new(resolution);
            let zones = usize::from(resolution).min(frame.distances.len());
            for zone in 0..zones {
                frame.distances[zone] = value;
                frame.statuses[zone] = 5;
            }
            Ok(Reading::Matrix(Box::new(frame)))
        } else {
            Ok(Reading::Single {
                distance_mm: value,
                status: 0,
            })
        }
    }

    fn stop(&mut self, _bus: &mut BusProxy<SimBus>) -> DriverResult<()> {
        let index = self.device()?;
        let fail = self
            .board
            .with_device(index, |d| {
                d.stops += 1;
                d.ranging = false;
                d.spec.fail_stop
            })
            .unwrap_or(false);
        if fail {
            Err(self.scripted_failure())
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_cycle_restores_factory_address() {
        let board = SimBoard::new();
        let idx = board.add_device(SimDeviceSpec::new(SensorClass::SingleZoneRanger, 4));
        board.set_line(4, true);
        assert_eq!(board.device_address(idx), Some(0x29));

        let mut bus = BusProxy::new(board.bus());
        let mut driver = board.create(SensorClass::SingleZoneRanger).unwrap();
        driver.init(&mut bus, 0x29).unwrap();
        driver.set_address(&mut bus, 0x30).unwrap();
        assert_eq!(board.device_address(idx), Some(0x30));

        board.set_line(4, false);
        assert_eq!(board.device_address(idx), None);
        board.set_line(4, true);
        assert_eq!(board.device_address(idx), Some(0x29));
    }

    #[test]
    fn test_warm_device_answers_at_programmed_address() {
        let board = SimBoard::new();
        let idx = board.add_device(
            SimDeviceSpec::new(SensorClass::SingleZoneRanger, 4).at_address(0x30),
        );
        board.set_line(4, true);
        assert_eq!(board.device_address(idx), Some(0x30));
        assert_eq!(board.responders_at(0x29), 0);
    }

    #[test]
    fn test_absent_device_never_answers() {
        let board = SimBoard::new();
        board.add_device(SimDeviceSpec::new(SensorClass::SingleZoneRanger, 4).absent());
        board.set_line(4, true);
        assert_eq!(board.responders_at(0x29), 0);
    }

    #[test]
    fn test_flaky_reads_recover() {
        let board = SimBoard::new();
        board.add_device(SimDeviceSpec::new(SensorClass::SingleZoneRanger, 4).flaky_reads(1));
        board.set_line(4, true);

        let mut bus = BusProxy::new(board.bus());
        let mut driver = board.create(SensorClass::SingleZoneRanger).unwrap();
        driver.init(&mut bus, 0x29).unwrap();
        driver.start(&mut bus).unwrap();
        assert!(driver.is_data_ready(&mut bus).unwrap());
        assert!(driver.read(&mut bus).is_err());
        assert!(matches!(
            driver.read(&mut bus).unwrap(),
            Reading::Single { distance_mm: 1, status: 0 }
        ));
    }

    #[test]
    fn test_matrix_reading_fills_active_zones() {
        let board = SimBoard::new();
        board.add_device(
            SimDeviceSpec::new(SensorClass::MultiZoneRanger, 4).with_resolution(16),
        );
        board.set_line(4, true);

        let mut bus = BusProxy::new(board.bus());
        let mut driver = board.create(SensorClass::MultiZoneRanger).unwrap();
        driver.init(&mut bus, 0x29).unwrap();
        driver.start(&mut bus).unwrap();
        assert_eq!(driver.current_resolution(&mut bus).unwrap(), 16);

        let Reading::Matrix(frame) = driver.read(&mut bus).unwrap() else {
            panic!("expected a matrix reading");
        };
        assert_eq!(frame.resolution, 16);
        assert!(frame.distances[..16].iter().all(|&d| d == 1));
        assert!(frame.distances[16..].iter().all(|&d| d == 0));
    }
}
