//! Startup orchestration.
//!
//! Turns validated settings and a sensor list into a running
//! [`AcquisitionLoop`]: build sessions, claim enable lines, arbitrate
//! addresses, and start ranging. The hardware comes in through generic
//! parameters so the same path drives real devices and the simulated board.

use crate::acquisition::AcquisitionLoop;
use crate::arbitration::{arbitrate, start_ranging};
use crate::config::sensor_list::SensorEntry;
use crate::config::Settings;
use crate::error::AppResult;
use crate::hardware::bus::BusProxy;
use crate::hardware::gpio::{EnableLineProvider, PowerSequencer};
use crate::hardware::registry::DriverFactory;
use crate::session::SensorSession;
use crate::telemetry::ChannelOptions;
use embedded_hal::i2c::I2c;
use tracing::{info, warn};

/// Bring every configured sensor up and hand back the loop that polls them.
///
/// # Errors
/// Only fatal problems (enable lines that cannot be claimed or driven) are
/// returned. A sensor that fails to come up is logged and left out.
pub fn bring_up<I, G, F>(
    settings: &Settings,
    entries: &[SensorEntry],
    i2c: I,
    provider: &mut G,
    factory: &F,
) -> AppResult<AcquisitionLoop<I, G::Pin>>
where
    I: I2c,
    G: EnableLineProvider,
    F: DriverFactory<I> + ?Sized,
{
    let mut sessions = entries
        .iter()
        .map(|entry| SensorSession::new(entry, factory))
        .collect::<AppResult<Vec<_>>>()?;

    let mut power = PowerSequencer::claim(
        provider,
        sessions.iter().map(|s| s.enable_line()),
        settings.settle_delay(),
    )?;
    let mut bus = BusProxy::new(i2c);
    let channels = ChannelOptions::new(&settings.shm_dir, settings.lock_timeout());

    let report = arbitrate(&mut bus, &mut power, &mut sessions, &channels, &settings.ranging)?;
    let started = start_ranging(&mut bus, &mut power, &mut sessions);

    if started == 0 {
        warn!(
            configured = sessions.len(),
            failed = report.failed.len(),
            "No sensor is publishing"
        );
    } else {
        info!(started, configured = sessions.len(), "Sensors ranging");
    }

    Ok(AcquisitionLoop::new(
        bus,
        power,
        sessions,
        settings.loop_interval(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SensorClass;
    use crate::hardware::mock::SimBoard;
    use tempfile::TempDir;

    #[test]
    fn test_bring_up_against_simulated_board() {
        let dir = TempDir::new().unwrap();
        let settings = Settings {
            shm_dir: dir.path().to_path_buf(),
            settle_ms: 0,
            loop_interval_ms: 1,
            ..Settings::default()
        };
        let entries = vec![
            SensorEntry {
                class: SensorClass::SingleZoneRanger,
                enable_line: 4,
                target_address: 0x30,
                channel_name: format!("app_{}", uuid::Uuid::new_v4().simple()),
            },
            SensorEntry {
                class: SensorClass::ColourSensor,
                enable_line: 5,
                target_address: 0x29,
                channel_name: format!("app_{}", uuid::Uuid::new_v4().simple()),
            },
        ];
        let board = SimBoard::from_entries(&entries);
        let mut provider = board.clone();

        let mut acquisition =
            bring_up(&settings, &entries, board.bus(), &mut provider, &board).unwrap();
        assert_eq!(acquisition.active_sessions(), 2);
        assert_eq!(acquisition.run_pass().published, 2);
        acquisition.shutdown().unwrap();
    }
}
