//! Per-sensor runtime handle.
//!
//! A [`SensorSession`] is built from one sensor-list entry before any
//! hardware is touched. It carries the sensor's driver (selected once by the
//! [`DriverFactory`] and kept for the whole run) and, after a successful
//! bring-up, its telemetry channel.
//!
//! ## Lifecycle
//!
//! ```text
//! new ──arbitration ok──► initialized ──shutdown──► released
//!  │                                                   ▲
//!  └──────────────arbitration failed──(release)────────┘
//! ```
//!
//! A session is `initialized` only while it holds both a configured device
//! and an open channel. Shutdown of a released session is a no-op.

use crate::config::sensor_list::SensorEntry;
use crate::config::RangingSettings;
use crate::core::{Reading, SensorClass};
use crate::error::{AppResult, DaemonError, DriverError};
use crate::hardware::bus::BusProxy;
use crate::hardware::capabilities::SensorDriver;
use crate::hardware::registry::DriverFactory;
use crate::telemetry::TelemetryChannel;
use tracing::{debug, warn};

/// One configured sensor.
pub struct SensorSession<I> {
    class: SensorClass,
    enable_line: u8,
    target_address: u8,
    channel_name: String,
    address: Option<u8>,
    initialized: bool,
    driver: Option<Box<dyn SensorDriver<I>>>,
    selection_error: Option<DriverError>,
    channel: Option<TelemetryChannel>,
}

impl<I> std::fmt::Debug for SensorSession<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorSession")
            .field("class", &self.class)
            .field("enable_line", &self.enable_line)
            .field("target_address", &format_args!("0x{:02x}", self.target_address))
            .field("channel_name", &self.channel_name)
            .field("initialized", &self.initialized)
            .finish()
    }
}

impl<I> SensorSession<I> {
    /// Build an uninitialized session and select its driver.
    ///
    /// A factory that cannot provide a driver for the class (for example a
    /// build without multi-zone support) does not fail here; the session
    /// remembers the reason and fails its bring-up with it.
    pub fn new<F>(entry: &SensorEntry, factory: &F) -> AppResult<Self>
    where
        F: DriverFactory<I> + ?Sized,
    {
        let enable_line = u8::try_from(entry.enable_line).map_err(|_| {
            DaemonError::Configuration(format!(
                "enable line {} of '{}' is out of range",
                entry.enable_line, entry.channel_name
            ))
        })?;
        let (driver, selection_error) = match factory.create(entry.class) {
            Ok(driver) => (Some(driver), None),
            Err(e) => (None, Some(e)),
        };
        Ok(Self {
            class: entry.class,
            enable_line,
            target_address: entry.target_address,
            channel_name: entry.channel_name.clone(),
            address: None,
            initialized: false,
            driver,
            selection_error,
            channel: None,
        })
    }

    pub fn class(&self) -> SensorClass {
        self.class
    }

    pub fn enable_line(&self) -> u8 {
        self.enable_line
    }

    pub fn target_address(&self) -> u8 {
        self.target_address
    }

    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    /// Address the device was left at, once initialized.
    pub fn address(&self) -> Option<u8> {
        self.address
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// The session's channel, if it has one.
    pub fn channel(&self) -> Option<&TelemetryChannel> {
        self.channel.as_ref()
    }

    /// Driver handle for bring-up.
    ///
    /// Fails with the selection error the first time if the factory had no
    /// driver for this class.
    pub fn driver_mut(&mut self) -> Result<&mut (dyn SensorDriver<I> + 'static), DriverError> {
        if self.driver.is_none() {
            return Err(self.selection_error.take().unwrap_or(DriverError::Released));
        }
        self.driver.as_deref_mut().ok_or(DriverError::Released)
    }

    /// Record a completed bring-up.
    pub fn mark_initialized(&mut self, address: u8, channel: TelemetryChannel) {
        self.address = Some(address);
        self.channel = Some(channel);
        self.initialized = true;
    }

    /// Drop the driver and channel of a session that never came up.
    pub fn release(&mut self) {
        self.initialized = false;
        self.address = None;
        self.driver = None;
        if let Some(channel) = self.channel.take() {
            if let Err(e) = channel.close() {
                warn!(channel = %self.channel_name, error = %e, "Failed to close channel");
            }
        }
    }

    /// Publish a reading to this session's channel.
    pub fn publish(&mut self, reading: &Reading) -> AppResult<()> {
        let channel = self
            .channel
            .as_mut()
            .ok_or_else(|| DaemonError::ChannelNotCreated(self.channel_name.clone()))?;
        match reading {
            Reading::Single {
                distance_mm,
                status,
            } => channel.publish_single(*distance_mm, *status),
            Reading::Matrix(frame) => {
                channel.publish_matrix(&frame.distances, &frame.statuses, frame.resolution)
            }
        }
    }

    /// Stop the device, release its driver state, and close the channel.
    ///
    /// Every step runs even if an earlier one failed; the first failure is
    /// returned. Sessions that are not initialized are skipped.
    pub fn shutdown(&mut self, bus: &mut BusProxy<I>) -> AppResult<()> {
        if !self.initialized {
            return Ok(());
        }
        let stopped = match self.driver.as_deref_mut() {
            Some(driver) => driver.stop(bus).map_err(|source| DaemonError::Stop {
                channel: self.channel_name.clone(),
                source,
            }),
            None => Ok(()),
        };
        if let Err(e) = &stopped {
            warn!(channel = %self.channel_name, error = %e, "Stop failed, releasing anyway");
        }
        self.driver = None;
        let closed = match self.channel.take() {
            Some(channel) => channel.close(),
            None => Ok(()),
        };
        self.initialized = false;
        self.address = None;
        debug!(channel = %self.channel_name, "Session shut down");
        stopped.and(closed)
    }
}

impl<I: embedded_hal::i2c::I2c> SensorSession<I> {
    /// Apply ranging parameters at the device's current address.
    pub fn configure(&mut self, bus: &mut BusProxy<I>, ranging: &RangingSettings) -> AppResult<()> {
        let channel = self.channel_name.clone();
        self.driver_mut()
            .and_then(|driver| driver.configure(bus, ranging))
            .map_err(|source| DaemonError::Init { channel, source })
    }

    /// Begin continuous measurement.
    pub fn start(&mut self, bus: &mut BusProxy<I>) -> AppResult<()> {
        let channel = self.channel_name.clone();
        self.driver_mut()
            .and_then(|driver| driver.start(bus))
            .map_err(|source| DaemonError::Init { channel, source })
    }

    /// Fetch a reading if one is waiting.
    ///
    /// Multi-zone devices are asked for their current resolution first, and
    /// a frame is trusted only for 16 or 64 zones.
    pub fn poll(&mut self, bus: &mut BusProxy<I>) -> AppResult<Option<Reading>> {
        let channel = &self.channel_name;
        let transient = |source| DaemonError::TransientRead {
            channel: channel.clone(),
            source,
        };
        let driver = self
            .driver
            .as_deref_mut()
            .ok_or_else(|| transient(DriverError::Released))?;

        if !driver.is_data_ready(bus).map_err(transient)? {
            return Ok(None);
        }
        if !self.class.is_multi_zone() {
            return driver.read(bus).map(Some).map_err(transient);
        }

        let resolution = driver.current_resolution(bus).map_err(transient)?;
        if !matches!(resolution, 16 | 64) {
            return Err(DaemonError::InvalidResolution {
                channel: channel.clone(),
                resolution,
            });
        }
        match driver.read(bus).map_err(transient)? {
            Reading::Matrix(mut frame) => {
                frame.resolution = resolution;
                Ok(Some(Reading::Matrix(frame)))
            }
            single => Ok(Some(single)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{SimBoard, SimBus, SimDeviceSpec};
    use crate::telemetry::ChannelOptions;
    use std::time::Duration;
    use tempfile::TempDir;

    fn entry(class: SensorClass, line: i32, address: u8, name: &str) -> SensorEntry {
        SensorEntry {
            class,
            enable_line: line,
            target_address: address,
            channel_name: format!("{}_{}", name, uuid::Uuid::new_v4().simple()),
        }
    }

    fn ready_session(
        board: &SimBoard,
        dir: &TempDir,
        class: SensorClass,
    ) -> (BusProxy<SimBus>, SensorSession<SimBus>) {
        board.set_line(4, true);
        let mut bus = BusProxy::new(board.bus());
        let mut session = SensorSession::new(&entry(class, 4, 0x29, "s"), board).unwrap();
        session.driver_mut().unwrap().init(&mut bus, 0x29).unwrap();
        let channel = ChannelOptions::new(dir.path(), Duration::from_millis(100))
            .create(session.channel_name(), class)
            .unwrap();
        session.mark_initialized(0x29, channel);
        session.start(&mut bus).unwrap();
        (bus, session)
    }

    #[test]
    fn test_new_session_is_uninitialized() {
        let board = SimBoard::new();
        let session: SensorSession<SimBus> =
            SensorSession::new(&entry(SensorClass::SingleZoneRanger, 4, 0x30, "s"), &board).unwrap();
        assert!(!session.is_initialized());
        assert_eq!(session.enable_line(), 4);
        assert_eq!(session.address(), None);
        assert!(session.channel().is_none());
    }

    #[test]
    fn test_negative_enable_line_is_rejected() {
        let board = SimBoard::new();
        let result: AppResult<SensorSession<SimBus>> =
            SensorSession::new(&entry(SensorClass::SingleZoneRanger, -1, 0x30, "s"), &board);
        assert!(matches!(result, Err(DaemonError::Configuration(_))));
    }

    #[test]
    fn test_publish_without_channel_fails() {
        let board = SimBoard::new();
        let mut session: SensorSession<SimBus> =
            SensorSession::new(&entry(SensorClass::SingleZoneRanger, 4, 0x30, "s"), &board).unwrap();
        let reading = Reading::Single {
            distance_mm: 1,
            status: 0,
        };
        assert!(matches!(
            session.publish(&reading),
            Err(DaemonError::ChannelNotCreated(_))
        ));
    }

    #[test]
    fn test_poll_skips_bad_resolution() {
        let board = SimBoard::new();
        let dir = TempDir::new().unwrap();
        let idx = board.add_device(
            SimDeviceSpec::new(SensorClass::MultiZoneRanger, 4).with_resolution(64),
        );
        let (mut bus, mut session) = ready_session(&board, &dir, SensorClass::MultiZoneRanger);

        assert!(matches!(
            session.poll(&mut bus).unwrap(),
            Some(Reading::Matrix(frame)) if frame.resolution == 64
        ));

        board.set_resolution(idx, 0);
        assert!(matches!(
            session.poll(&mut bus),
            Err(DaemonError::InvalidResolution { resolution: 0, .. })
        ));
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let board = SimBoard::new();
        let dir = TempDir::new().unwrap();
        let idx = board.add_device(SimDeviceSpec::new(SensorClass::SingleZoneRanger, 4));
        let (mut bus, mut session) = ready_session(&board, &dir, SensorClass::SingleZoneRanger);
        let path = session.channel().unwrap().path().to_path_buf();

        session.shutdown(&mut bus).unwrap();
        session.shutdown(&mut bus).unwrap();

        assert!(!session.is_initialized());
        assert!(!path.exists());
        assert_eq!(board.stop_count(idx), 1);
    }

    #[test]
    fn test_shutdown_releases_after_stop_failure() {
        let board = SimBoard::new();
        let dir = TempDir::new().unwrap();
        board.add_device(SimDeviceSpec::new(SensorClass::SingleZoneRanger, 4).failing_stop());
        let (mut bus, mut session) = ready_session(&board, &dir, SensorClass::SingleZoneRanger);
        let path = session.channel().unwrap().path().to_path_buf();

        assert!(matches!(
            session.shutdown(&mut bus),
            Err(DaemonError::Stop { .. })
        ));
        assert!(!session.is_initialized());
        assert!(!path.exists());
    }
}
