//! sensors2shm daemon
//!
//! Arbitrates the sensor bus, then publishes readings to shared memory until
//! SIGINT or SIGTERM.
//!
//! # Usage
//!
//! ```bash
//! sensors2shm --sensors /etc/sensors2shm/sensors.txt
//! sensors2shm --daemon
//! sensors2shm --simulate --sensors ./sensors_config.txt --log-level debug
//! ```

use anyhow::Result;
use clap::Parser;
use embedded_hal::digital::OutputPin;
use embedded_hal::i2c::I2c;
use linux_embedded_hal::I2cdev;
use sensors2shm::acquisition::AcquisitionLoop;
use sensors2shm::app::bring_up;
use sensors2shm::config::sensor_list::{load_sensor_list, SensorEntry};
use sensors2shm::config::Settings;
use sensors2shm::daemon::{self, PidFile};
use sensors2shm::error::{AppResult, DaemonError};
use sensors2shm::hardware::gpio::CdevGpio;
use sensors2shm::hardware::mock::SimBoard;
use sensors2shm::hardware::registry::NativeDriverFactory;
use sensors2shm::{logging, validation};
use std::path::PathBuf;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "sensors2shm")]
#[command(about = "Publish I2C ranging and colour sensor readings to shared memory", long_about = None)]
struct Cli {
    /// Detach and run in the background
    #[arg(long)]
    daemon: bool,

    /// Settings file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Sensor list, overrides the settings file
    #[arg(long)]
    sensors: Option<PathBuf>,

    /// Log level, overrides the settings file
    #[arg(long)]
    log_level: Option<String>,

    /// Run against a simulated board instead of real hardware
    #[arg(long)]
    simulate: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };
    if let Some(path) = &cli.sensors {
        settings.sensor_list = path.clone();
    }
    if let Some(level) = &cli.log_level {
        settings.log_level = level.clone();
    }
    settings.validate().map_err(DaemonError::Configuration)?;
    logging::init_from_settings(&settings).map_err(anyhow::Error::msg)?;

    if let Err(e) = run(&cli, &settings) {
        error!(error = %e, fatal = e.is_fatal(), "sensors2shm exiting");
        return Err(e.into());
    }
    Ok(())
}

fn run(cli: &Cli, settings: &Settings) -> AppResult<()> {
    let list = load_sensor_list(&settings.sensor_list)?;
    validation::validate_sensor_entries(&list.entries)?;
    info!(
        sensors = list.entries.len(),
        skipped = list.skipped.len(),
        path = %settings.sensor_list.display(),
        "Loaded sensor list"
    );
    PidFile::check_not_running(&settings.pid_file)?;

    if cli.simulate {
        let board = SimBoard::from_entries(&list.entries);
        let mut provider = board.clone();
        let acquisition = bring_up(settings, &list.entries, board.bus(), &mut provider, &board)?;
        serve(acquisition, settings, cli.daemon)
    } else {
        let acquisition = bring_up_hardware(settings, &list.entries)?;
        serve(acquisition, settings, cli.daemon)
    }
}

fn bring_up_hardware(
    settings: &Settings,
    entries: &[SensorEntry],
) -> AppResult<AcquisitionLoop<I2cdev, linux_embedded_hal::CdevPin>> {
    let i2c = I2cdev::new(&settings.i2c_bus).map_err(|e| {
        DaemonError::BusUnavailable(format!("{}: {}", settings.i2c_bus.display(), e))
    })?;
    let mut gpio = CdevGpio::open(&settings.gpio_chip)?;
    let factory = NativeDriverFactory::new(&settings.i2c_bus, settings.boot_timeout());
    bring_up(settings, entries, i2c, &mut gpio, &factory)
}

/// Detach if asked, then run the loop until a shutdown signal arrives.
fn serve<I, P>(mut acquisition: AcquisitionLoop<I, P>, settings: &Settings, background: bool) -> AppResult<()>
where
    I: I2c + Send + 'static,
    P: OutputPin + Send + 'static,
{
    // Forking has to happen before the runtime starts any threads.
    if background {
        daemon::daemonize()?;
    }
    let _pid_file = PidFile::create(&settings.pid_file)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let joined = runtime.block_on(async move {
        let cancel = CancellationToken::new();
        tokio::spawn(wait_for_shutdown(cancel.clone()));

        tokio::task::spawn_blocking(move || {
            acquisition.run(&cancel);
            acquisition.shutdown()
        })
        .await
    });
    joined.map_err(|e| DaemonError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;

    info!("Clean shutdown");
    Ok(())
}

/// Cancel `cancel` on SIGINT or SIGTERM.
async fn wait_for_shutdown(cancel: CancellationToken) {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            error!(error = %e, "Could not install SIGTERM handler, only SIGINT will stop the daemon");
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("SIGINT received, draining");
            }
            cancel.cancel();
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("SIGINT received, draining"),
        _ = terminate.recv() => info!("SIGTERM received, draining"),
    }
    cancel.cancel();
}
