//! Custom error types for the daemon.
//!
//! `DaemonError` is the single error type surfaced by startup, the
//! acquisition loop, and shutdown. Lower layers use narrower types that
//! convert into it:
//!
//! - **`BusError`**: a failed transaction on the shared I2C bus, tagged with
//!   the device address that was selected.
//! - **`DriverError`**: anything a sensor driver reports, including bus
//!   failures, timeouts waiting for the part, and vendor status codes.
//!
//! Errors fall into two groups. Fatal ones (configuration, bus or GPIO
//! unavailable, another instance running) end the process with a non-zero
//! status. Everything else is scoped to one sensor: startup marks that
//! sensor failed and moves on, the loop logs and skips it for the pass.

use embedded_hal::i2c::ErrorKind;
use thiserror::Error;

/// Convenience alias for results using the daemon error type.
pub type AppResult<T> = std::result::Result<T, DaemonError>;

/// A bus transaction that did not complete.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("I2C transaction with 0x{address:02x} failed: {kind:?}")]
pub struct BusError {
    /// 7-bit address the transaction targeted.
    pub address: u8,
    /// Classification reported by the bus implementation.
    pub kind: ErrorKind,
}

impl BusError {
    /// Whether the device simply did not acknowledge its address.
    pub fn is_no_acknowledge(&self) -> bool {
        matches!(self.kind, ErrorKind::NoAcknowledge(_))
    }
}

/// Errors reported by sensor drivers.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("device did not report booted within {waited_ms} ms")]
    BootTimeout { waited_ms: u64 },

    #[error("no measurement became ready within {waited_ms} ms")]
    DataReadyTimeout { waited_ms: u64 },

    #[error("unexpected identification 0x{found:02x} (expected {expected})")]
    UnexpectedId { expected: &'static str, found: u8 },

    #[error("operation not supported by this sensor: {0}")]
    Unsupported(&'static str),

    #[error("vendor driver call '{operation}' returned status {status}")]
    Vendor { operation: &'static str, status: u8 },

    #[error("invalid driver parameter: {0}")]
    InvalidParameter(String),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("driver state has already been released")]
    Released,
}

/// Errors produced by the daemon.
#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I2C bus unavailable: {0}")]
    BusUnavailable(String),

    #[error("GPIO unavailable: {0}")]
    GpioUnavailable(String),

    #[error("enable line {line} for sensor '{channel}' did not switch: {reason}")]
    EnableLine {
        channel: String,
        line: u8,
        reason: String,
    },

    #[error(
        "sensor '{channel}' not found at 0x{default_address:02x} or 0x{target_address:02x}"
    )]
    DeviceNotFound {
        channel: String,
        default_address: u8,
        target_address: u8,
    },

    #[error("sensor '{channel}' failed to initialize: {source}")]
    Init {
        channel: String,
        #[source]
        source: DriverError,
    },

    #[error("sensor '{channel}' could not be moved to 0x{target_address:02x}: {source}")]
    AddressChange {
        channel: String,
        target_address: u8,
        #[source]
        source: DriverError,
    },

    #[error("sensor '{channel}' failed to stop: {source}")]
    Stop {
        channel: String,
        #[source]
        source: DriverError,
    },

    #[error("telemetry channel '{channel}' could not be created: {reason}")]
    ChannelCreation { channel: String, reason: String },

    #[error("transient read failure on '{channel}': {source}")]
    TransientRead {
        channel: String,
        #[source]
        source: DriverError,
    },

    #[error("telemetry channel '{0}' was never created")]
    ChannelNotCreated(String),

    #[error("timed out after {waited_ms} ms waiting for the lock on '{channel}'")]
    LockTimeout { channel: String, waited_ms: u64 },

    #[error("sensor '{channel}' reported unsupported resolution {resolution}")]
    InvalidResolution { channel: String, resolution: u8 },

    #[error("corrupt record on '{channel}': {source}")]
    CorruptRecord {
        channel: String,
        #[source]
        source: crate::telemetry::record::RecordError,
    },

    #[error("another instance is already running (pid {0})")]
    AlreadyRunning(i32),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    #[error("Shutdown failed with {} error(s): {:?}", .0.len(), .0)]
    ShutdownFailed(Vec<DaemonError>),
}

impl DaemonError {
    /// Whether the error must end the process.
    ///
    /// Per-sensor failures never are.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DaemonError::Config(_)
                | DaemonError::Configuration(_)
                | DaemonError::BusUnavailable(_)
                | DaemonError::GpioUnavailable(_)
                | DaemonError::AlreadyRunning(_)
                | DaemonError::Io(_)
        )
    }

    /// Channel name the error is scoped to, if any.
    pub fn channel(&self) -> Option<&str> {
        match self {
            DaemonError::DeviceNotFound { channel, .. }
            | DaemonError::EnableLine { channel, .. }
            | DaemonError::Init { channel, .. }
            | DaemonError::AddressChange { channel, .. }
            | DaemonError::Stop { channel, .. }
            | DaemonError::ChannelCreation { channel, .. }
            | DaemonError::TransientRead { channel, .. }
            | DaemonError::LockTimeout { channel, .. }
            | DaemonError::InvalidResolution { channel, .. }
            | DaemonError::CorruptRecord { channel, .. } => Some(channel),
            DaemonError::ChannelNotCreated(channel) => Some(channel),
            _ => None,
        }
    }
}
