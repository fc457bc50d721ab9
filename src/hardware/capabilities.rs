//! Sensor driver capabilities.
//!
//! Every supported sensor model is driven through [`SensorDriver`]. A driver
//! value is the opaque per-device state of one sensor session: register
//! shadows, calibration values, or a vendor configuration block. It is created
//! once when the session is built and dropped when the session shuts down.
//!
//! Drivers do not own the bus. Each call borrows the shared [`BusProxy`] and
//! names the address to use, so the same driver works before and after the
//! device is moved off its factory-default address.
//!
//! # Call order
//!
//! ```text
//! init(default or target) -> set_address(target)? -> configure -> start
//!     -> { is_data_ready -> current_resolution? -> read }* -> stop
//! ```
//!
//! # Contract
//! - Methods never panic on device or bus errors
//! - `read` is only called after `is_data_ready` returned true
//! - `stop` is safe to call on a device that never started ranging

use crate::config::RangingSettings;
use crate::core::{Reading, SensorClass};
use crate::error::DriverError;
use crate::hardware::bus::BusProxy;

/// Result alias for driver operations.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Capability: sensor bring-up, addressing, and ranging.
///
/// # Example
///
/// ```rust,ignore
/// let mut driver = factory.create(SensorClass::SingleZoneRanger)?;
/// driver.init(&mut bus, 0x29)?;
/// driver.set_address(&mut bus, 0x30)?;
/// driver.configure(&mut bus, &settings.ranging)?;
/// driver.start(&mut bus)?;
/// if driver.is_data_ready(&mut bus)? {
///     let reading = driver.read(&mut bus)?;
/// }
/// ```
pub trait SensorDriver<I>: Send {
    /// Model this driver handles.
    fn class(&self) -> SensorClass;

    /// Address the driver currently talks to.
    fn address(&self) -> u8;

    /// Wait for boot and load the device's base configuration at `address`.
    fn init(&mut self, bus: &mut BusProxy<I>, address: u8) -> DriverResult<()>;

    /// Move the device to `new_address`.
    ///
    /// # Contract
    /// - On success all later calls use `new_address`
    /// - On failure the device is assumed to still answer at the old address
    fn set_address(&mut self, bus: &mut BusProxy<I>, new_address: u8) -> DriverResult<()>;

    /// Apply ranging parameters. Called at the final address.
    fn configure(&mut self, bus: &mut BusProxy<I>, ranging: &RangingSettings) -> DriverResult<()>;

    /// Begin continuous measurement.
    fn start(&mut self, bus: &mut BusProxy<I>) -> DriverResult<()>;

    /// Whether a fresh measurement is waiting.
    fn is_data_ready(&mut self, bus: &mut BusProxy<I>) -> DriverResult<bool>;

    /// Zone count the device is currently producing.
    ///
    /// Single-zone parts report 1.
    fn current_resolution(&mut self, _bus: &mut BusProxy<I>) -> DriverResult<u8> {
        Ok(1)
    }

    /// Fetch the waiting measurement and re-arm the device.
    fn read(&mut self, bus: &mut BusProxy<I>) -> DriverResult<Reading>;

    /// Stop measuring.
    fn stop(&mut self, bus: &mut BusProxy<I>) -> DriverResult<()>;
}
