//! End-to-end bring-up against the simulated board.

use sensors2shm::acquisition::AcquisitionLoop;
use sensors2shm::app::bring_up;
use sensors2shm::config::sensor_list::{parse_sensor_list, SensorEntry};
use sensors2shm::config::Settings;
use sensors2shm::core::SensorClass;
use sensors2shm::hardware::mock::{SimBoard, SimBus, SimDeviceSpec, SimPin};
use sensors2shm::telemetry::semaphore::{semaphore_name, NamedSemaphore};
use sensors2shm::telemetry::{Payload, RecordFormat, TelemetryReader, RECORD_SIZE};
use sensors2shm::validation::validate_sensor_entries;
use std::collections::HashSet;
use tempfile::TempDir;

fn unique(name: &str) -> String {
    format!("{}_{}", name, uuid::Uuid::new_v4().simple())
}

fn settings(dir: &TempDir) -> Settings {
    Settings {
        shm_dir: dir.path().to_path_buf(),
        settle_ms: 0,
        loop_interval_ms: 1,
        ..Settings::default()
    }
}

fn entry(class: SensorClass, enable_line: i32, target_address: u8, name: &str) -> SensorEntry {
    SensorEntry {
        class,
        enable_line,
        target_address,
        channel_name: unique(name),
    }
}

fn start(
    board: &SimBoard,
    dir: &TempDir,
    entries: &[SensorEntry],
) -> AcquisitionLoop<SimBus, SimPin> {
    validate_sensor_entries(entries).expect("valid sensor list");
    let mut provider = board.clone();
    bring_up(&settings(dir), entries, board.bus(), &mut provider, board).expect("bring-up")
}

#[test]
fn test_single_and_multi_zone_both_come_up() {
    let dir = TempDir::new().unwrap();
    let entries = vec![
        entry(SensorClass::SingleZoneRanger, 4, 0x30, "s0"),
        entry(SensorClass::MultiZoneRanger, 5, 0x31, "s1"),
    ];
    let board = SimBoard::from_entries(&entries);
    let mut acquisition = start(&board, &dir, &entries);

    assert!(acquisition.sessions().iter().all(|s| s.is_initialized()));
    for session in acquisition.sessions() {
        let path = dir.path().join(session.channel_name());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), RECORD_SIZE as u64);
        assert!(NamedSemaphore::open(&semaphore_name(session.channel_name())).is_ok());
    }

    assert_eq!(acquisition.run_pass().published, 2);

    let single = TelemetryReader::open(dir.path(), &entries[0].channel_name).unwrap();
    let record = single.read().unwrap();
    assert_eq!(record.format(), RecordFormat::Single);
    assert_eq!(record.class(), Some(SensorClass::SingleZoneRanger));
    assert_eq!(record.resolution, 1);

    let matrix = TelemetryReader::open(dir.path(), &entries[1].channel_name).unwrap();
    let record = matrix.read().unwrap();
    assert_eq!(record.format(), RecordFormat::Matrix);
    assert_eq!(record.resolution, 64);

    acquisition.shutdown().unwrap();
}

#[test]
fn test_silent_sensor_gets_no_channel() {
    let dir = TempDir::new().unwrap();
    let entries = vec![
        entry(SensorClass::SingleZoneRanger, 4, 0x30, "s0"),
        entry(SensorClass::MultiZoneRanger, 5, 0x31, "s1"),
    ];
    let board = SimBoard::new();
    board.add_device(SimDeviceSpec::new(SensorClass::SingleZoneRanger, 4));
    board.add_device(SimDeviceSpec::new(SensorClass::MultiZoneRanger, 5).absent());
    let mut acquisition = start(&board, &dir, &entries);

    let sessions = acquisition.sessions();
    assert!(sessions[0].is_initialized());
    assert!(!sessions[1].is_initialized());
    assert!(!dir.path().join(&entries[1].channel_name).exists());
    assert!(NamedSemaphore::open(&semaphore_name(&entries[1].channel_name)).is_err());

    for _ in 0..3 {
        let report = acquisition.run_pass();
        assert_eq!(report.published, 1);
        assert_eq!(report.failed, 0);
    }
    let record = TelemetryReader::open(dir.path(), &entries[0].channel_name)
        .unwrap()
        .read()
        .unwrap();
    assert_eq!(
        record.payload,
        Payload::Single {
            distance_mm: 3,
            status: 0
        }
    );

    acquisition.shutdown().unwrap();
}

#[test]
fn test_resolved_addresses_are_unique() {
    let cases: &[&[(SensorClass, i32, u8)]] = &[
        &[
            (SensorClass::SingleZoneRanger, 4, 0x30),
            (SensorClass::SingleZoneRanger, 5, 0x31),
            (SensorClass::SingleZoneRanger, 6, 0x32),
        ],
        &[
            (SensorClass::MultiZoneRanger, 17, 0x40),
            (SensorClass::SingleZoneRanger, 27, 0x08),
            (SensorClass::ColourSensor, 22, 0x29),
        ],
        &[
            (SensorClass::SingleZoneRanger, 0, 0x77),
            (SensorClass::MultiZoneRanger, 40, 0x52),
        ],
    ];

    for case in cases {
        let dir = TempDir::new().unwrap();
        let entries: Vec<_> = case
            .iter()
            .map(|&(class, line, address)| entry(class, line, address, "u"))
            .collect();
        let board = SimBoard::from_entries(&entries);
        let mut acquisition = start(&board, &dir, &entries);

        let addresses: Vec<u8> = acquisition
            .sessions()
            .iter()
            .filter_map(|s| s.address())
            .collect();
        assert_eq!(addresses.len(), entries.len(), "case {:?}", case);
        let distinct: HashSet<_> = addresses.iter().collect();
        assert_eq!(distinct.len(), addresses.len(), "case {:?}", case);
        for &address in &addresses {
            assert_eq!(board.responders_at(address), 1, "case {:?}", case);
        }

        acquisition.shutdown().unwrap();
    }
}

#[test]
fn test_sensor_list_drives_bring_up() {
    let dir = TempDir::new().unwrap();
    let front = unique("front");
    let floor = unique("floor");
    let text = format!(
        "# type pin address channel\n\
         l1x 17 0x30 {front}\n\
         \n\
         bogus line\n\
         l5cx 27 31 {floor}  # matrix\n"
    );
    let list = parse_sensor_list(&text);
    assert_eq!(list.entries.len(), 2);
    assert_eq!(list.skipped.len(), 1);

    let board = SimBoard::from_entries(&list.entries);
    let mut acquisition = start(&board, &dir, &list.entries);
    assert_eq!(acquisition.active_sessions(), 2);
    assert_eq!(acquisition.sessions()[1].address(), Some(0x31));
    acquisition.shutdown().unwrap();
}
