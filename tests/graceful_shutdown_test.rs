//! Integration tests for graceful shutdown behavior.

use sensors2shm::acquisition::{AcquisitionLoop, LoopState};
use sensors2shm::app::bring_up;
use sensors2shm::config::sensor_list::SensorEntry;
use sensors2shm::config::Settings;
use sensors2shm::core::SensorClass;
use sensors2shm::error::DaemonError;
use sensors2shm::hardware::mock::{SimBoard, SimBus, SimDeviceSpec, SimPin};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Two rangers on lines 4 and 5, brought up on `board`.
fn create_test_loop(
    board: &SimBoard,
    dir: &TempDir,
) -> (Vec<SensorEntry>, AcquisitionLoop<SimBus, SimPin>) {
    let entries: Vec<_> = [(4, 0x30), (5, 0x31)]
        .iter()
        .map(|&(line, address)| SensorEntry {
            class: SensorClass::SingleZoneRanger,
            enable_line: line,
            target_address: address,
            channel_name: format!("shutdown_{}", uuid::Uuid::new_v4().simple()),
        })
        .collect();
    let settings = Settings {
        shm_dir: dir.path().to_path_buf(),
        settle_ms: 0,
        loop_interval_ms: 2,
        ..Settings::default()
    };
    let mut provider = board.clone();
    let acquisition = bring_up(&settings, &entries, board.bus(), &mut provider, board)
        .expect("Failed to bring up simulated sensors");
    (entries, acquisition)
}

#[test]
fn test_cancel_stops_loop_within_a_pass() {
    let board = SimBoard::new();
    board.add_device(SimDeviceSpec::new(SensorClass::SingleZoneRanger, 4));
    board.add_device(SimDeviceSpec::new(SensorClass::SingleZoneRanger, 5));
    let dir = TempDir::new().unwrap();
    let (_, mut acquisition) = create_test_loop(&board, &dir);

    let cancel = CancellationToken::new();
    let worker = {
        let cancel = cancel.clone();
        thread::spawn(move || {
            let totals = acquisition.run(&cancel);
            (acquisition, totals)
        })
    };

    thread::sleep(Duration::from_millis(50));
    let start = Instant::now();
    cancel.cancel();
    let (mut acquisition, totals) = worker.join().expect("loop thread panicked");

    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(acquisition.state(), LoopState::Stopped);
    assert!(totals.published >= 2);
    assert_eq!(totals.failed, 0);
    acquisition.shutdown().unwrap();
}

#[test]
fn test_multiple_shutdown_calls() {
    let board = SimBoard::new();
    let a = board.add_device(SimDeviceSpec::new(SensorClass::SingleZoneRanger, 4));
    let b = board.add_device(SimDeviceSpec::new(SensorClass::SingleZoneRanger, 5));
    let dir = TempDir::new().unwrap();
    let (entries, mut acquisition) = create_test_loop(&board, &dir);
    acquisition.run_pass();

    acquisition.shutdown().unwrap();
    acquisition.shutdown().unwrap();

    for entry in &entries {
        assert!(!dir.path().join(&entry.channel_name).exists());
    }
    assert_eq!(board.stop_count(a), 1);
    assert_eq!(board.stop_count(b), 1);
    assert!(!board.line(4));
    assert!(!board.line(5));
}

#[test]
fn test_stop_failure_does_not_block_the_rest() {
    let board = SimBoard::new();
    board.add_device(SimDeviceSpec::new(SensorClass::SingleZoneRanger, 4).failing_stop());
    let b = board.add_device(SimDeviceSpec::new(SensorClass::SingleZoneRanger, 5));
    let dir = TempDir::new().unwrap();
    let (entries, mut acquisition) = create_test_loop(&board, &dir);

    let Err(DaemonError::ShutdownFailed(errors)) = acquisition.shutdown() else {
        panic!("expected the failed stop to be reported");
    };
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], DaemonError::Stop { .. }));

    // The failing sensor's channel and the healthy sensor were still released.
    for entry in &entries {
        assert!(!dir.path().join(&entry.channel_name).exists());
    }
    assert_eq!(board.stop_count(b), 1);
    assert!(!board.line(4));
    assert!(!board.line(5));

    assert!(acquisition.shutdown().is_ok());
}

#[test]
fn test_shutdown_before_any_pass() {
    let board = SimBoard::new();
    board.add_device(SimDeviceSpec::new(SensorClass::SingleZoneRanger, 4).absent());
    board.add_device(SimDeviceSpec::new(SensorClass::SingleZoneRanger, 5).absent());
    let dir = TempDir::new().unwrap();
    let (_, mut acquisition) = create_test_loop(&board, &dir);

    assert_eq!(acquisition.active_sessions(), 0);
    acquisition.shutdown().unwrap();
}
