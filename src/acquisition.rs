//! Acquisition loop.
//!
//! After arbitration the loop owns the bus, the enable lines, and every
//! session. Each pass visits the initialized sessions in sensor-list order,
//! publishes whatever reading is waiting, and never blocks on a sensor that
//! has nothing yet. Errors are scoped to one sensor for one pass.
//!
//! ## States
//!
//! ```text
//! Running ──cancel observed after a pass──► Draining ──► Stopped
//! ```
//!
//! Cancellation is only looked at between passes, so a pass always runs to
//! completion. [`AcquisitionLoop::shutdown`] stops and releases every
//! session afterwards and may be called any number of times.

use crate::error::{AppResult, DaemonError};
use crate::hardware::bus::BusProxy;
use crate::hardware::gpio::PowerSequencer;
use crate::session::SensorSession;
use embedded_hal::digital::OutputPin;
use embedded_hal::i2c::I2c;
use std::collections::BTreeSet;
use std::ops::AddAssign;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    /// Shutdown requested; the in-flight pass finishes first.
    Draining,
    Stopped,
}

/// What one pass (or the whole run) did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub published: u64,
    pub not_ready: u64,
    pub failed: u64,
}

impl AddAssign for PassReport {
    fn add_assign(&mut self, other: Self) {
        self.published += other.published;
        self.not_ready += other.not_ready;
        self.failed += other.failed;
    }
}

/// The steady-state scheduler.
pub struct AcquisitionLoop<I, P> {
    bus: Option<BusProxy<I>>,
    power: PowerSequencer<P>,
    sessions: Vec<SensorSession<I>>,
    interval: Duration,
    state: LoopState,
    totals: PassReport,
    passes: u64,
}

impl<I: I2c, P: OutputPin> AcquisitionLoop<I, P> {
    /// Take ownership of the arbitrated hardware.
    pub fn new(
        bus: BusProxy<I>,
        power: PowerSequencer<P>,
        sessions: Vec<SensorSession<I>>,
        interval: Duration,
    ) -> Self {
        Self {
            bus: Some(bus),
            power,
            sessions,
            interval,
            state: LoopState::Running,
            totals: PassReport::default(),
            passes: 0,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn sessions(&self) -> &[SensorSession<I>] {
        &self.sessions
    }

    /// Number of sessions that will be polled.
    pub fn active_sessions(&self) -> usize {
        self.sessions.iter().filter(|s| s.is_initialized()).count()
    }

    /// Counts accumulated over every completed pass.
    pub fn totals(&self) -> PassReport {
        self.totals
    }

    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// Ask the loop to stop after the current pass.
    pub fn request_stop(&mut self) {
        if self.state == LoopState::Running {
            self.state = LoopState::Draining;
        }
    }

    /// Visit every initialized session once.
    pub fn run_pass(&mut self) -> PassReport {
        let mut report = PassReport::default();
        let Some(bus) = self.bus.as_mut() else {
            return report;
        };

        for session in self.sessions.iter_mut().filter(|s| s.is_initialized()) {
            let outcome = session
                .poll(bus)
                .and_then(|reading| match reading {
                    Some(reading) => session.publish(&reading).map(|()| true),
                    None => Ok(false),
                });
            match outcome {
                Ok(true) => {
                    report.published += 1;
                    debug!(channel = session.channel_name(), "Published reading");
                }
                Ok(false) => report.not_ready += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(channel = session.channel_name(), error = %e, "Skipping sensor for this pass");
                }
            }
        }

        self.totals += report;
        self.passes += 1;
        debug!(
            published = report.published,
            not_ready = report.not_ready,
            failed = report.failed,
            "Pass complete"
        );
        report
    }

    /// Run passes until `cancel` fires, then drain and stop.
    ///
    /// Blocks the calling thread.
    pub fn run(&mut self, cancel: &CancellationToken) -> PassReport {
        info!(
            sensors = self.active_sessions(),
            interval_ms = self.interval.as_millis() as u64,
            "Acquisition loop running"
        );
        while self.state == LoopState::Running {
            self.run_pass();
            if cancel.is_cancelled() {
                self.request_stop();
                break;
            }
            std::thread::sleep(self.interval);
        }
        if self.state == LoopState::Draining {
            debug!("Draining complete");
        }
        self.state = LoopState::Stopped;
        self.totals
    }

    /// Stop every initialized session, drive its line low, release the bus.
    ///
    /// Runs to completion even when a sensor fails to stop. Calling it again
    /// does nothing.
    pub fn shutdown(&mut self) -> AppResult<()> {
        self.state = LoopState::Stopped;
        let Some(mut bus) = self.bus.take() else {
            return Ok(());
        };

        let mut errors = Vec::new();
        let mut lines = BTreeSet::new();
        for session in self.sessions.iter_mut().filter(|s| s.is_initialized()) {
            lines.insert(session.enable_line());
            if let Err(e) = session.shutdown(&mut bus) {
                errors.push(e);
            }
        }
        // Lines go low only after every sensor on them has been stopped.
        for line in lines {
            if let Err(e) = self.power.disable(line) {
                warn!(pin = line, error = %e, "Could not release enable line");
                errors.push(e);
            }
        }
        drop(bus);

        info!(
            passes = self.passes,
            published = self.totals.published,
            not_ready = self.totals.not_ready,
            failed = self.totals.failed,
            "Acquisition stopped"
        );
        if errors.is_empty() {
            Ok(())
        } else {
            Err(DaemonError::ShutdownFailed(errors))
        }
    }
}
