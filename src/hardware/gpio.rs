//! Enable-line power sequencing.
//!
//! Each sensor's shutdown pin is wired to a GPIO output. Holding a line low
//! keeps that sensor off the bus, which is what lets devices that all wake up
//! at the same factory-default address be brought up one at a time.
//!
//! [`PowerSequencer`] owns every claimed line and waits a settle delay after
//! each transition. Lines come from an [`EnableLineProvider`]: the Linux GPIO
//! character device in production, the simulated board in tests.

use crate::error::{AppResult, DaemonError};
use embedded_hal::digital::{Error as _, OutputPin};
use linux_embedded_hal::gpio_cdev::{Chip, LineRequestFlags};
use linux_embedded_hal::CdevPin;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Consumer label shown by `gpioinfo` for claimed lines.
const CONSUMER: &str = "sensors2shm";

/// Source of enable-line outputs.
pub trait EnableLineProvider {
    /// Output pin handed out for a claimed line.
    type Pin: OutputPin + Send;

    /// Claim `line` as an output, initially low.
    fn claim(&mut self, line: u8) -> AppResult<Self::Pin>;
}

/// Enable lines on a Linux GPIO character device.
pub struct CdevGpio {
    chip: Chip,
    path: PathBuf,
}

impl CdevGpio {
    /// Open the GPIO chip at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        let chip = Chip::new(&path)
            .map_err(|e| DaemonError::GpioUnavailable(format!("{}: {}", path.display(), e)))?;
        info!(chip = %path.display(), "Opened GPIO chip");
        Ok(Self { chip, path })
    }
}

impl EnableLineProvider for CdevGpio {
    type Pin = CdevPin;

    fn claim(&mut self, line: u8) -> AppResult<CdevPin> {
        let unavailable = |e: &dyn std::fmt::Display| {
            DaemonError::GpioUnavailable(format!(
                "{} line {}: {}",
                self.path.display(),
                line,
                e
            ))
        };
        let handle = self
            .chip
            .get_line(u32::from(line))
            .map_err(|e| unavailable(&e))?
            .request(LineRequestFlags::OUTPUT, 0, CONSUMER)
            .map_err(|e| unavailable(&e))?;
        CdevPin::new(handle).map_err(|e| unavailable(&e))
    }
}

/// Owner of every enable line, keyed by line number.
///
/// Several sensors may share a line; it is claimed once.
pub struct PowerSequencer<P> {
    lines: BTreeMap<u8, P>,
    settle: Duration,
}

impl<P: OutputPin> PowerSequencer<P> {
    /// Claim each distinct line from `provider`.
    pub fn claim<G>(
        provider: &mut G,
        lines: impl IntoIterator<Item = u8>,
        settle: Duration,
    ) -> AppResult<Self>
    where
        G: EnableLineProvider<Pin = P>,
    {
        let mut claimed = BTreeMap::new();
        for line in lines {
            if claimed.contains_key(&line) {
                continue;
            }
            let pin = provider.claim(line)?;
            debug!(pin = line, "Claimed enable line");
            claimed.insert(line, pin);
        }
        Ok(Self {
            lines: claimed,
            settle,
        })
    }

    /// Claimed line numbers, ascending.
    pub fn lines(&self) -> impl Iterator<Item = u8> + '_ {
        self.lines.keys().copied()
    }

    /// Drive every line low and wait for the devices to settle.
    pub fn hold_all_in_reset(&mut self) -> AppResult<()> {
        for (&line, pin) in self.lines.iter_mut() {
            pin.set_low().map_err(|e| line_error(line, e.kind()))?;
        }
        debug!(count = self.lines.len(), "All enable lines low");
        self.settle();
        Ok(())
    }

    /// Drive `line` high and wait for the device to boot.
    pub fn enable(&mut self, line: u8) -> AppResult<()> {
        self.pin(line)?
            .set_high()
            .map_err(|e| line_error(line, e.kind()))?;
        debug!(pin = line, "Enable line high");
        self.settle();
        Ok(())
    }

    /// Drive `line` low. Does not wait.
    pub fn disable(&mut self, line: u8) -> AppResult<()> {
        self.pin(line)?
            .set_low()
            .map_err(|e| line_error(line, e.kind()))?;
        debug!(pin = line, "Enable line low");
        Ok(())
    }

    /// Wait one settle delay.
    pub fn settle(&self) {
        if !self.settle.is_zero() {
            std::thread::sleep(self.settle);
        }
    }

    fn pin(&mut self, line: u8) -> AppResult<&mut P> {
        self.lines
            .get_mut(&line)
            .ok_or_else(|| DaemonError::GpioUnavailable(format!("line {} was never claimed", line)))
    }
}

fn line_error(line: u8, kind: embedded_hal::digital::ErrorKind) -> DaemonError {
    DaemonError::GpioUnavailable(format!("line {}: {:?}", line, kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::SimBoard;

    #[test]
    fn test_shared_lines_are_claimed_once() {
        let mut board = SimBoard::new();
        let power = PowerSequencer::claim(&mut board, [4, 5, 4], Duration::ZERO).unwrap();
        assert_eq!(power.lines().collect::<Vec<_>>(), vec![4, 5]);
    }

    #[test]
    fn test_hold_all_in_reset_drives_every_line_low() {
        let mut board = SimBoard::new();
        let mut power = PowerSequencer::claim(&mut board, [4, 5], Duration::ZERO).unwrap();
        power.enable(4).unwrap();
        power.enable(5).unwrap();
        assert!(board.line(4) && board.line(5));

        power.hold_all_in_reset().unwrap();
        assert!(!board.line(4));
        assert!(!board.line(5));
    }

    #[test]
    fn test_unclaimed_line_is_an_error() {
        let mut board = SimBoard::new();
        let mut power = PowerSequencer::claim(&mut board, [4], Duration::ZERO).unwrap();
        assert!(matches!(
            power.enable(9),
            Err(DaemonError::GpioUnavailable(_))
        ));
    }

    #[test]
    fn test_settle_delay_is_applied() {
        let mut board = SimBoard::new();
        let mut power =
            PowerSequencer::claim(&mut board, [4], Duration::from_millis(20)).unwrap();
        let started = std::time::Instant::now();
        power.enable(4).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(20));
    }
}
