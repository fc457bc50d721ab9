//! Per-class driver selection.
//!
//! A session asks a [`DriverFactory`] for its driver exactly once, when the
//! session is built. The factory decides which implementation backs each
//! sensor class:
//!
//! | Class | Driver | Source |
//! |-------|--------|--------|
//! | `l1x`  | [`Vl53l1x`] | native register driver |
//! | `tcs`  | [`Tcs34725`] | native register driver |
//! | `l5cx` | `Vl53l5cx` | vendor ultra-lite driver, `--features vl53l5cx` |
//!
//! Tests and dry runs use [`crate::hardware::mock::SimBoard`], which is a
//! factory for simulated drivers.

use crate::core::SensorClass;
use crate::hardware::capabilities::{DriverResult, SensorDriver};
use crate::hardware::tcs34725::Tcs34725;
use crate::hardware::vl53l1x::Vl53l1x;
use embedded_hal::i2c::I2c;
use std::path::PathBuf;
use std::time::Duration;

/// Creates the driver for a sensor class.
pub trait DriverFactory<I> {
    /// Build a fresh, uninitialized driver.
    fn create(&self, class: SensorClass) -> DriverResult<Box<dyn SensorDriver<I>>>;
}

/// Factory for real hardware.
#[derive(Debug, Clone)]
pub struct NativeDriverFactory {
    /// Bus device path, needed by drivers that open their own descriptor.
    pub i2c_bus: PathBuf,
    /// Upper bound on boot and calibration waits.
    pub boot_timeout: Duration,
}

impl NativeDriverFactory {
    /// Factory for sensors on `i2c_bus`.
    pub fn new(i2c_bus: impl Into<PathBuf>, boot_timeout: Duration) -> Self {
        Self {
            i2c_bus: i2c_bus.into(),
            boot_timeout,
        }
    }
}

impl<I: I2c + 'static> DriverFactory<I> for NativeDriverFactory {
    fn create(&self, class: SensorClass) -> DriverResult<Box<dyn SensorDriver<I>>> {
        match class {
            SensorClass::SingleZoneRanger => Ok(Box::new(Vl53l1x::new(self.boot_timeout))),
            SensorClass::ColourSensor => Ok(Box::new(Tcs34725::new())),
            SensorClass::MultiZoneRanger => create_multi_zone(&self.i2c_bus),
        }
    }
}

#[cfg(feature = "vl53l5cx")]
fn create_multi_zone<I: I2c + 'static>(
    i2c_bus: &std::path::Path,
) -> DriverResult<Box<dyn SensorDriver<I>>> {
    Ok(Box::new(crate::hardware::vl53l5cx::Vl53l5cx::new(i2c_bus)))
}

#[cfg(not(feature = "vl53l5cx"))]
fn create_multi_zone<I: I2c + 'static>(
    _i2c_bus: &std::path::Path,
) -> DriverResult<Box<dyn SensorDriver<I>>> {
    Err(crate::error::DriverError::FeatureNotEnabled(
        "vl53l5cx".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::SimBus;

    fn factory() -> NativeDriverFactory {
        NativeDriverFactory::new("/dev/i2c-1", Duration::from_millis(100))
    }

    #[test]
    fn test_native_factory_selects_by_class() {
        let single: Box<dyn SensorDriver<SimBus>> =
            factory().create(SensorClass::SingleZoneRanger).unwrap();
        assert_eq!(single.class(), SensorClass::SingleZoneRanger);

        let colour: Box<dyn SensorDriver<SimBus>> =
            factory().create(SensorClass::ColourSensor).unwrap();
        assert_eq!(colour.class(), SensorClass::ColourSensor);
    }

    #[cfg(not(feature = "vl53l5cx"))]
    #[test]
    fn test_multi_zone_requires_feature() {
        let result: DriverResult<Box<dyn SensorDriver<SimBus>>> =
            factory().create(SensorClass::MultiZoneRanger);
        assert!(matches!(
            result,
            Err(crate::error::DriverError::FeatureNotEnabled(_))
        ));
    }
}
