//! Address arbitration.
//!
//! Every supported part wakes up at the same factory-default address, so the
//! sensors are brought up strictly one at a time:
//!
//! 1. All enable lines are driven low and the bus settles.
//! 2. For each session in sensor-list order, its line is driven high and the
//!    device is looked for at the factory default, then at its target (a
//!    warm restart where the device kept its earlier assignment).
//! 3. A device found at the default is initialized there and moved to its
//!    target; one found at the target is initialized in place.
//! 4. Ranging parameters are applied at the final address and the session's
//!    channel is created.
//!
//! A sensor that fails any step stays uninitialized and its line goes low
//! again before the next sensor is powered, so a half-configured device can
//! not answer the next probe. An enable line that will not switch fails only
//! the sensors behind it. Only failing to hold every line in reset aborts
//! arbitration.

use crate::config::RangingSettings;
use crate::core::FACTORY_DEFAULT_ADDRESS;
use crate::error::{AppResult, BusError, DaemonError, DriverError};
use crate::hardware::bus::BusProxy;
use crate::hardware::gpio::PowerSequencer;
use crate::session::SensorSession;
use crate::telemetry::ChannelOptions;
use embedded_hal::digital::OutputPin;
use embedded_hal::i2c::{ErrorKind, I2c, NoAcknowledgeSource};
use tracing::{info, warn};

/// Outcome of arbitrating every session.
#[derive(Debug, Default)]
pub struct ArbitrationReport {
    /// Channel names of sessions that came up, in order.
    pub initialized: Vec<String>,
    /// Per-sensor failures, in order.
    pub failed: Vec<DaemonError>,
}

impl ArbitrationReport {
    pub fn all_initialized(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Power up and address every session in order.
///
/// # Errors
/// Only a failure to drive every line low up front is returned; per-sensor
/// problems, including a single line that will not switch, are logged and
/// collected in the report.
pub fn arbitrate<I, P>(
    bus: &mut BusProxy<I>,
    power: &mut PowerSequencer<P>,
    sessions: &mut [SensorSession<I>],
    channels: &ChannelOptions,
    ranging: &RangingSettings,
) -> AppResult<ArbitrationReport>
where
    I: I2c,
    P: OutputPin,
{
    let mut report = ArbitrationReport::default();
    power.hold_all_in_reset()?;

    for index in 0..sessions.len() {
        let line = sessions[index].enable_line();
        if let Some(awake) = sessions[..index]
            .iter()
            .find(|s| s.address() == Some(FACTORY_DEFAULT_ADDRESS))
        {
            warn!(
                channel = sessions[index].channel_name(),
                awake = awake.channel_name(),
                "A sensor is still awake at the factory-default address; probes may be ambiguous"
            );
        }

        let result = power
            .enable(line)
            .map_err(|e| enable_line_error(&sessions[index], e))
            .and_then(|()| bring_up(bus, &mut sessions[index], channels, ranging));
        let session = &mut sessions[index];
        match result {
            Ok(address) => {
                info!(
                    channel = session.channel_name(),
                    class = %session.class(),
                    pin = line,
                    address = format_args!("0x{:02x}", address),
                    "Sensor initialized"
                );
                report.initialized.push(session.channel_name().to_string());
            }
            Err(e) => {
                warn!(channel = session.channel_name(), pin = line, error = %e, "Sensor left uninitialized");
                session.release();
                if !line_in_use(sessions, line) {
                    power_down(power, line);
                    power.settle();
                }
                report.failed.push(e);
            }
        }
    }

    info!(
        initialized = report.initialized.len(),
        failed = report.failed.len(),
        "Arbitration complete"
    );
    Ok(report)
}

/// Start ranging on every initialized session.
///
/// A session whose device refuses to start is shut down and its line
/// released like any other bring-up failure. Returns how many started.
pub fn start_ranging<I, P>(
    bus: &mut BusProxy<I>,
    power: &mut PowerSequencer<P>,
    sessions: &mut [SensorSession<I>],
) -> usize
where
    I: I2c,
    P: OutputPin,
{
    let mut started = 0;
    for index in 0..sessions.len() {
        let session = &mut sessions[index];
        if !session.is_initialized() {
            continue;
        }
        match session.start(bus) {
            Ok(()) => started += 1,
            Err(e) => {
                warn!(channel = session.channel_name(), error = %e, "Ranging did not start");
                if let Err(e) = session.shutdown(bus) {
                    warn!(channel = session.channel_name(), error = %e, "Cleanup after failed start");
                }
                let line = session.enable_line();
                if !line_in_use(sessions, line) {
                    power_down(power, line);
                }
            }
        }
    }
    started
}

/// Drive `line` low after a failure. A line that will not switch is only
/// logged; the failure that led here is what gets reported.
fn power_down<P: OutputPin>(power: &mut PowerSequencer<P>, line: u8) {
    if let Err(e) = power.disable(line) {
        warn!(pin = line, error = %e, "Could not power down failed sensor");
    }
}

fn enable_line_error<I>(session: &SensorSession<I>, source: DaemonError) -> DaemonError {
    DaemonError::EnableLine {
        channel: session.channel_name().to_string(),
        line: session.enable_line(),
        reason: source.to_string(),
    }
}

/// Whether an initialized session is powered through `line`.
fn line_in_use<I>(sessions: &[SensorSession<I>], line: u8) -> bool {
    sessions
        .iter()
        .any(|s| s.is_initialized() && s.enable_line() == line)
}

/// Detect, initialize, re-address, configure, and open the channel.
fn bring_up<I: I2c>(
    bus: &mut BusProxy<I>,
    session: &mut SensorSession<I>,
    channels: &ChannelOptions,
    ranging: &RangingSettings,
) -> AppResult<u8> {
    let channel = session.channel_name().to_string();
    let default = session.class().factory_default_address();
    let target = session.target_address();

    let found_at = if bus.probe(default) {
        default
    } else if target != default && bus.probe(target) {
        info!(channel = %channel, address = format_args!("0x{:02x}", target), "Sensor already at its target address");
        target
    } else {
        return Err(DaemonError::DeviceNotFound {
            channel,
            default_address: default,
            target_address: target,
        });
    };

    let init_failed = |source| DaemonError::Init {
        channel: channel.clone(),
        source,
    };
    session
        .driver_mut()
        .and_then(|driver| driver.init(bus, found_at))
        .map_err(init_failed)?;

    if found_at != target {
        let moved = session
            .driver_mut()
            .and_then(|driver| driver.set_address(bus, target))
            .and_then(|()| {
                if bus.probe(target) {
                    Ok(())
                } else {
                    Err(DriverError::Bus(BusError {
                        address: target,
                        kind: ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address),
                    }))
                }
            });
        moved.map_err(|source| DaemonError::AddressChange {
            channel: channel.clone(),
            target_address: target,
            source,
        })?;
    }

    session.configure(bus, ranging)?;
    let created = channels.create(&channel, session.class())?;
    session.mark_initialized(target, created);
    Ok(target)
}
