//! Pre-flight checks on the sensor list.
//!
//! Everything here runs before any hardware is touched. A violation aborts
//! startup with [`DaemonError::Configuration`].

use crate::config::sensor_list::SensorEntry;
use crate::core::{MAX_BUS_ADDRESS, MAX_ENABLE_LINE, MIN_BUS_ADDRESS};
use crate::error::{AppResult, DaemonError};
use std::collections::HashSet;

pub use crate::telemetry::semaphore::MAX_CHANNEL_NAME_LEN;

/// Validates that a 7-bit address is assignable on the bus.
///
/// # Arguments
///
/// * `address` - The 7-bit bus address to validate.
///
/// # Returns
///
/// * `Ok(())` if the address lies in `0x08..=0x77`.
/// * `Err(&'static str)` for reserved addresses.
pub fn is_valid_bus_address(address: u8) -> Result<(), &'static str> {
    if (MIN_BUS_ADDRESS..=MAX_BUS_ADDRESS).contains(&address) {
        Ok(())
    } else {
        Err("Address must be in 0x08..=0x77")
    }
}

/// Validates an enable line number.
///
/// # Arguments
///
/// * `line` - GPIO line offset as written in the sensor list.
///
/// # Returns
///
/// * `Ok(())` if the line lies in `0..=40`.
/// * `Err(&'static str)` otherwise.
pub fn is_valid_enable_line(line: i32) -> Result<(), &'static str> {
    if (0..=MAX_ENABLE_LINE).contains(&line) {
        Ok(())
    } else {
        Err("Enable line must be in 0..=40")
    }
}

/// Validates a telemetry channel name.
///
/// The name becomes both a file under the shared-memory directory and part
/// of a semaphore name, so it must be a single non-empty path component.
pub fn is_valid_channel_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Channel name cannot be empty");
    }
    if name.len() > MAX_CHANNEL_NAME_LEN {
        return Err("Channel name is longer than 247 bytes");
    }
    if name.contains('/') {
        return Err("Channel name cannot contain '/'");
    }
    if name.contains('\0') {
        return Err("Channel name cannot contain null bytes");
    }
    if name == "." || name == ".." {
        return Err("Channel name cannot be '.' or '..'");
    }
    Ok(())
}

/// Check every entry and the list as a whole.
///
/// All violations are collected into a single error message so the
/// operator can fix the file in one go.
pub fn validate_sensor_entries(entries: &[SensorEntry]) -> AppResult<()> {
    let mut problems = Vec::new();

    if entries.is_empty() {
        problems.push("no sensors configured".to_string());
    }

    let mut addresses = HashSet::new();
    let mut names = HashSet::new();

    for entry in entries {
        let name = &entry.channel_name;
        if let Err(reason) = is_valid_bus_address(entry.target_address) {
            problems.push(format!(
                "'{}': address 0x{:02x}: {}",
                name, entry.target_address, reason
            ));
        }
        if let Err(reason) = is_valid_enable_line(entry.enable_line) {
            problems.push(format!(
                "'{}': enable line {}: {}",
                name, entry.enable_line, reason
            ));
        }
        if let Err(reason) = is_valid_channel_name(name) {
            problems.push(format!("'{}': {}", name, reason));
        }
        if !addresses.insert(entry.target_address) {
            problems.push(format!(
                "'{}': duplicate address 0x{:02x}",
                name, entry.target_address
            ));
        }
        if !names.insert(name.as_str()) {
            problems.push(format!("duplicate channel name '{}'", name));
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(DaemonError::Configuration(problems.join("; ")))
    }
}
