//! Core data types shared by the bus, driver, and telemetry layers.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 7-bit address every supported sensor answers on after power-up.
pub const FACTORY_DEFAULT_ADDRESS: u8 = 0x29;

/// Lowest assignable 7-bit bus address.
pub const MIN_BUS_ADDRESS: u8 = 0x08;

/// Highest assignable 7-bit bus address.
pub const MAX_BUS_ADDRESS: u8 = 0x77;

/// Highest enable line number accepted in the sensor list.
pub const MAX_ENABLE_LINE: i32 = 40;

/// Maximum number of sensors read from the sensor list.
pub const MAX_SENSORS: usize = 6;

/// Largest zone count a multi-zone sensor can report (8x8).
pub const MAX_ZONES: usize = 64;

/// Model of a sensor attached to the shared bus.
///
/// The numeric discriminants are the `class` byte of the published record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum SensorClass {
    /// Single-zone time-of-flight ranger (VL53L1X).
    #[serde(rename = "l1x")]
    SingleZoneRanger = 0,
    /// Multi-zone time-of-flight ranger (VL53L5CX, 4x4 or 8x8).
    #[serde(rename = "l5cx")]
    MultiZoneRanger = 1,
    /// RGBC colour sensor (TCS34725).
    #[serde(rename = "tcs")]
    ColourSensor = 2,
}

impl SensorClass {
    /// Address the part answers on straight out of reset.
    pub fn factory_default_address(self) -> u8 {
        FACTORY_DEFAULT_ADDRESS
    }

    /// Whether readings from this class are published in the matrix layout.
    pub fn is_multi_zone(self) -> bool {
        matches!(self, SensorClass::MultiZoneRanger)
    }

    /// Whether the part can be moved off its factory address.
    pub fn supports_readdressing(self) -> bool {
        !matches!(self, SensorClass::ColourSensor)
    }

    /// Sensor-list keyword for this class.
    pub fn keyword(self) -> &'static str {
        match self {
            SensorClass::SingleZoneRanger => "l1x",
            SensorClass::MultiZoneRanger => "l5cx",
            SensorClass::ColourSensor => "tcs",
        }
    }

    /// Decode the record `class` byte.
    pub fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(SensorClass::SingleZoneRanger),
            1 => Some(SensorClass::MultiZoneRanger),
            2 => Some(SensorClass::ColourSensor),
            _ => None,
        }
    }
}

impl fmt::Display for SensorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

impl FromStr for SensorClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "l1x" => Ok(SensorClass::SingleZoneRanger),
            "l5cx" => Ok(SensorClass::MultiZoneRanger),
            "tcs" => Ok(SensorClass::ColourSensor),
            other => Err(format!("unknown sensor type '{}'", other)),
        }
    }
}

/// Zone grid of a multi-zone reading.
///
/// Only the first `resolution` entries of each array are meaningful.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneFrame {
    /// Active zone count, 16 (4x4) or 64 (8x8).
    pub resolution: u8,
    /// Per-zone distance in millimetres.
    pub distances: [u16; MAX_ZONES],
    /// Per-zone target status.
    pub statuses: [u8; MAX_ZONES],
}

impl ZoneFrame {
    /// An empty frame with the given zone count.
    pub fn new(resolution: u8) -> Self {
        Self {
            resolution,
            distances: [0; MAX_ZONES],
            statuses: [0; MAX_ZONES],
        }
    }
}

/// One measurement pulled from a driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reading {
    /// A single distance (or clear-channel count for colour sensors) and its status.
    Single {
        /// Distance in millimetres.
        distance_mm: u16,
        /// Driver-specific range status.
        status: u8,
    },
    /// A zone grid from a multi-zone ranger.
    Matrix(Box<ZoneFrame>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_class_keywords_round_trip() {
        for class in [
            SensorClass::SingleZoneRanger,
            SensorClass::MultiZoneRanger,
            SensorClass::ColourSensor,
        ] {
            assert_eq!(class.keyword().parse::<SensorClass>(), Ok(class));
            assert_eq!(SensorClass::from_wire(class as u8), Some(class));
        }
        assert!("vl6180".parse::<SensorClass>().is_err());
        assert_eq!(SensorClass::from_wire(3), None);
    }

    #[test]
    fn test_only_colour_sensor_is_fixed_address() {
        assert!(SensorClass::SingleZoneRanger.supports_readdressing());
        assert!(SensorClass::MultiZoneRanger.supports_readdressing());
        assert!(!SensorClass::ColourSensor.supports_readdressing());
        assert!(SensorClass::MultiZoneRanger.is_multi_zone());
    }
}
