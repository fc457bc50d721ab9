//! Sensor list parsing.
//!
//! One sensor per line:
//!
//! ```text
//! # type  enable_line  address  channel
//! l1x     17           0x30     front_range
//! l5cx    27           0x31     floor_matrix
//! tcs     22           29       belt_colour
//! ```
//!
//! Lines that cannot be parsed are skipped with a warning; range checks
//! happen later in [`crate::validation`], where a violation is fatal.

use crate::core::{SensorClass, MAX_SENSORS};
use crate::error::AppResult;
use std::path::Path;
use tracing::{debug, warn};

/// One parsed line of the sensor list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorEntry {
    /// Sensor model.
    pub class: SensorClass,
    /// GPIO line gating the sensor's power. Range-checked by validation.
    pub enable_line: i32,
    /// 7-bit address the sensor is moved to.
    pub target_address: u8,
    /// Name of the telemetry channel the sensor publishes to.
    pub channel_name: String,
}

/// A line that was ignored, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedLine {
    /// 1-based line number.
    pub line_number: usize,
    /// Why the line was rejected.
    pub reason: String,
}

/// Result of parsing a sensor list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SensorList {
    /// Accepted records, in file order.
    pub entries: Vec<SensorEntry>,
    /// Malformed or surplus lines.
    pub skipped: Vec<SkippedLine>,
}

/// Parse sensor list text.
pub fn parse_sensor_list(text: &str) -> SensorList {
    let mut list = SensorList::default();

    for (index, raw) in text.lines().enumerate() {
        let line_number = index + 1;
        let line = match raw.split_once('#') {
            Some((before, _)) => before.trim(),
            None => raw.trim(),
        };
        if line.is_empty() {
            continue;
        }

        if list.entries.len() == MAX_SENSORS {
            warn!(
                line = line_number,
                max = MAX_SENSORS,
                "Sensor list holds more than the supported number of sensors; ignoring the rest"
            );
            list.skipped.push(SkippedLine {
                line_number,
                reason: format!("more than {} sensors", MAX_SENSORS),
            });
            continue;
        }

        match parse_line(line) {
            Ok(entry) => {
                debug!(
                    line = line_number,
                    class = %entry.class,
                    pin = entry.enable_line,
                    address = format_args!("0x{:02x}", entry.target_address),
                    channel = %entry.channel_name,
                    "Parsed sensor entry"
                );
                list.entries.push(entry);
            }
            Err(reason) => {
                warn!(line = line_number, %reason, "Skipping malformed sensor list line");
                list.skipped.push(SkippedLine {
                    line_number,
                    reason,
                });
            }
        }
    }

    list
}

/// Read and parse a sensor list file.
///
/// An unreadable file is an error; malformed lines are not.
pub fn load_sensor_list<P: AsRef<Path>>(path: P) -> AppResult<SensorList> {
    let text = std::fs::read_to_string(path.as_ref())?;
    Ok(parse_sensor_list(&text))
}

fn parse_line(line: &str) -> Result<SensorEntry, String> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let &[kind, pin, address, name] = fields.as_slice() else {
        return Err(format!("expected 4 fields, found {}", fields.len()));
    };

    let class: SensorClass = kind.parse()?;
    let enable_line: i32 = pin
        .parse()
        .map_err(|_| format!("enable line '{}' is not an integer", pin))?;
    let digits = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
        .unwrap_or(address);
    let target_address = u8::from_str_radix(digits, 16)
        .map_err(|_| format!("address '{}' is not a hex byte", address))?;

    Ok(SensorEntry {
        class,
        enable_line,
        target_address,
        channel_name: name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_all_sensor_types() {
        let list = parse_sensor_list(
            "l1x 17 0x30 front\n\
             l5cx 27 31 floor\n\
             tcs 22 0X29 belt\n",
        );
        assert!(list.skipped.is_empty());
        assert_eq!(list.entries.len(), 3);
        assert_eq!(
            list.entries[0],
            SensorEntry {
                class: SensorClass::SingleZoneRanger,
                enable_line: 17,
                target_address: 0x30,
                channel_name: "front".to_string(),
            }
        );
        assert_eq!(list.entries[1].class, SensorClass::MultiZoneRanger);
        assert_eq!(list.entries[1].target_address, 0x31);
        assert_eq!(list.entries[2].target_address, 0x29);
    }

    #[test]
    fn test_comments_and_blank_lines_are_ignored() {
        let list = parse_sensor_list(
            "# type pin addr name\n\
             \n\
             \t  l1x   4   0x30   left   # trailing note\n\
             #l1x 5 0x31 disabled\n",
        );
        assert_eq!(list.entries.len(), 1);
        assert_eq!(list.entries[0].channel_name, "left");
        assert!(list.skipped.is_empty());
    }

    #[test]
    fn test_malformed_lines_are_skipped_not_fatal() {
        let list = parse_sensor_list(
            "l1x 4 0x30\n\
             vl6180 4 0x30 left\n\
             l1x four 0x30 left\n\
             l1x 4 0x130 left\n\
             l1x 4 0x31 right\n",
        );
        assert_eq!(list.entries.len(), 1);
        assert_eq!(list.entries[0].channel_name, "right");
        let lines: Vec<usize> = list.skipped.iter().map(|s| s.line_number).collect();
        assert_eq!(lines, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_out_of_range_values_survive_parsing() {
        // Range checks belong to validation, which rejects them fatally.
        let list = parse_sensor_list("l1x -1 0x05 low\n");
        assert_eq!(list.entries.len(), 1);
        assert_eq!(list.entries[0].enable_line, -1);
        assert_eq!(list.entries[0].target_address, 0x05);
    }

    #[test]
    fn test_caps_sensor_count() {
        let text: String = (0..8)
            .map(|i| format!("l1x {} 0x{:02x} s{}\n", i, 0x30 + i, i))
            .collect();
        let list = parse_sensor_list(&text);
        assert_eq!(list.entries.len(), MAX_SENSORS);
        assert_eq!(list.skipped.len(), 2);
    }

    #[test]
    fn test_load_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_sensor_list(dir.path().join("nope.txt")).is_err());
    }
}
