//! Daemon configuration using Figment.
//!
//! Settings are loaded from:
//! 1. built-in defaults
//! 2. a TOML file (`/etc/sensors2shm/sensors2shm.toml` unless overridden; a
//!    missing file leaves the defaults in place)
//! 3. environment variables prefixed with `SENSORS2SHM_`, nested keys
//!    separated by a double underscore
//!    (`SENSORS2SHM_RANGING__TIMING_BUDGET_MS=50`)
//!
//! The sensor list itself is a separate plain-text file, parsed by
//! [`sensor_list`].
//!
//! # Example
//! ```no_run
//! use sensors2shm::config::Settings;
//!
//! let settings = Settings::load()?;
//! settings.validate().map_err(sensors2shm::error::DaemonError::Configuration)?;
//! println!("bus: {}", settings.i2c_bus.display());
//! # Ok::<(), sensors2shm::error::DaemonError>(())
//! ```

pub mod sensor_list;

use crate::error::AppResult;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the daemon settings file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/sensors2shm/sensors2shm.toml";

/// Top-level daemon settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// I2C character device shared by every sensor.
    #[serde(default = "default_i2c_bus")]
    pub i2c_bus: PathBuf,
    /// GPIO character device carrying the enable lines.
    #[serde(default = "default_gpio_chip")]
    pub gpio_chip: PathBuf,
    /// Sensor list file.
    #[serde(default = "default_sensor_list")]
    pub sensor_list: PathBuf,
    /// Directory shared-memory segments are created in.
    #[serde(default = "default_shm_dir")]
    pub shm_dir: PathBuf,
    /// PID file written in background mode.
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,
    /// Delay after every enable-line transition, in milliseconds.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// Delay between acquisition passes, in milliseconds.
    #[serde(default = "default_loop_interval_ms")]
    pub loop_interval_ms: u64,
    /// Upper bound on waiting for a device to finish booting.
    #[serde(default = "default_boot_timeout_ms")]
    pub boot_timeout_ms: u64,
    /// Upper bound on waiting for a channel lock when publishing.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Optional log file, used instead of stderr.
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    /// Device ranging parameters.
    #[serde(default)]
    pub ranging: RangingSettings,
}

/// Distance mode of the single-zone ranger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMode {
    /// Up to roughly 1.3 m, better ambient immunity.
    Short,
    /// Up to roughly 4 m.
    Long,
}

/// Ranging parameters handed to each driver's `configure` step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RangingSettings {
    /// Single-zone distance mode.
    #[serde(default = "default_distance_mode")]
    pub distance_mode: DistanceMode,
    /// Single-zone timing budget in milliseconds.
    #[serde(default = "default_timing_budget_ms")]
    pub timing_budget_ms: u16,
    /// Single-zone inter-measurement period in milliseconds.
    #[serde(default = "default_inter_measurement_ms")]
    pub inter_measurement_ms: u32,
    /// Multi-zone zone count (16 or 64).
    #[serde(default = "default_zone_resolution")]
    pub zone_resolution: u8,
    /// Multi-zone ranging frequency in hertz.
    #[serde(default = "default_ranging_frequency_hz")]
    pub ranging_frequency_hz: u8,
}

// Default value functions
fn default_i2c_bus() -> PathBuf {
    PathBuf::from("/dev/i2c-1")
}

fn default_gpio_chip() -> PathBuf {
    PathBuf::from("/dev/gpiochip0")
}

fn default_sensor_list() -> PathBuf {
    PathBuf::from("./sensors_config.txt")
}

fn default_shm_dir() -> PathBuf {
    PathBuf::from("/dev/shm")
}

fn default_pid_file() -> PathBuf {
    PathBuf::from("/run/sensors2shm.pid")
}

fn default_settle_ms() -> u64 {
    100
}

fn default_loop_interval_ms() -> u64 {
    10
}

fn default_boot_timeout_ms() -> u64 {
    1000
}

fn default_lock_timeout_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

fn default_distance_mode() -> DistanceMode {
    DistanceMode::Long
}

fn default_timing_budget_ms() -> u16 {
    100
}

fn default_inter_measurement_ms() -> u32 {
    100
}

fn default_zone_resolution() -> u8 {
    64
}

fn default_ranging_frequency_hz() -> u8 {
    10
}

impl Default for RangingSettings {
    fn default() -> Self {
        Self {
            distance_mode: default_distance_mode(),
            timing_budget_ms: default_timing_budget_ms(),
            inter_measurement_ms: default_inter_measurement_ms(),
            zone_resolution: default_zone_resolution(),
            ranging_frequency_hz: default_ranging_frequency_hz(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            i2c_bus: default_i2c_bus(),
            gpio_chip: default_gpio_chip(),
            sensor_list: default_sensor_list(),
            shm_dir: default_shm_dir(),
            pid_file: default_pid_file(),
            settle_ms: default_settle_ms(),
            loop_interval_ms: default_loop_interval_ms(),
            boot_timeout_ms: default_boot_timeout_ms(),
            lock_timeout_ms: default_lock_timeout_ms(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            log_file: None,
            ranging: RangingSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from the default file and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load settings from a specific file path and the environment.
    ///
    /// Environment variables can override configuration with prefix `SENSORS2SHM_`.
    /// Example: `SENSORS2SHM_LOOP_INTERVAL_MS=20`
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Self::from_figment(
            Figment::from(Serialized::defaults(Settings::default()))
                .merge(Toml::file(path.as_ref()))
                .merge(Env::prefixed("SENSORS2SHM_").split("__")),
        )
    }

    /// Load settings from TOML text only, without consulting the environment.
    pub fn from_toml_str(toml: &str) -> AppResult<Self> {
        Self::from_figment(
            Figment::from(Serialized::defaults(Settings::default())).merge(Toml::string(toml)),
        )
    }

    fn from_figment(figment: Figment) -> AppResult<Self> {
        Ok(figment.extract()?)
    }

    /// Validate settings after loading.
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            ));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.log_format.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.log_format,
                valid_formats.join(", ")
            ));
        }

        if self.loop_interval_ms == 0 {
            return Err("loop_interval_ms must be greater than 0".to_string());
        }

        let ranging = &self.ranging;
        if ranging.zone_resolution != 16 && ranging.zone_resolution != 64 {
            return Err(format!(
                "Invalid ranging.zone_resolution {}. Must be 16 or 64",
                ranging.zone_resolution
            ));
        }

        let max_hz = if ranging.zone_resolution == 64 { 15 } else { 60 };
        if ranging.ranging_frequency_hz == 0 || ranging.ranging_frequency_hz > max_hz {
            return Err(format!(
                "Invalid ranging.ranging_frequency_hz {}. Must be 1-{} at {} zones",
                ranging.ranging_frequency_hz, max_hz, ranging.zone_resolution
            ));
        }

        if u32::from(ranging.timing_budget_ms) > ranging.inter_measurement_ms {
            return Err(format!(
                "ranging.timing_budget_ms ({}) must not exceed ranging.inter_measurement_ms ({})",
                ranging.timing_budget_ms, ranging.inter_measurement_ms
            ));
        }

        Ok(())
    }

    /// Enable-line settle delay.
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// Delay between acquisition passes.
    pub fn loop_interval(&self) -> Duration {
        Duration::from_millis(self.loop_interval_ms)
    }

    /// Device boot wait bound.
    pub fn boot_timeout(&self) -> Duration {
        Duration::from_millis(self.boot_timeout_ms)
    }

    /// Writer lock wait bound.
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}
