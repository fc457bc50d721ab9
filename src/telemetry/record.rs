//! Published record layout.
//!
//! Every channel holds one fixed 200-byte record, little-endian:
//!
//! ```text
//! offset  size  field
//! 0       4     timestamp (seconds since epoch)
//! 4       1     sensor class (0 = l1x, 1 = l5cx, 2 = tcs)
//! 5       1     resolution (1, 16 or 64)
//! 6       1     format (0 = single, 1 = matrix)
//! 7       1     reserved
//! -- single --
//! 8       2     distance_mm
//! 10      1     status
//! 11      5     reserved
//! -- matrix --
//! 8       128   distances[64]
//! 136     64    statuses[64]
//! ```
//!
//! A single publish rewrites bytes `0..16` only. A matrix publish rewrites the
//! header and the first `resolution` entries of each array; the rest keep
//! whatever an earlier publish left there.

use crate::core::{SensorClass, MAX_ZONES};
use thiserror::Error;

/// Size of the record and of the shared-memory segment holding it.
pub const RECORD_SIZE: usize = HEADER_SIZE + MAX_ZONES * 3;

/// Header bytes shared by both layouts.
pub const HEADER_SIZE: usize = 8;

const TIMESTAMP: usize = 0;
const CLASS: usize = 4;
const RESOLUTION: usize = 5;
const FORMAT: usize = 6;
const RESERVED: usize = 7;

const SINGLE_DISTANCE: usize = 8;
const SINGLE_STATUS: usize = 10;
const SINGLE_END: usize = 16;

const MATRIX_DISTANCES: usize = 8;
const MATRIX_STATUSES: usize = MATRIX_DISTANCES + MAX_ZONES * 2;

/// Payload layout tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordFormat {
    Single = 0,
    Matrix = 1,
}

/// Why a record could not be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("record is {0} bytes, expected at least {RECORD_SIZE}")]
    Truncated(usize),

    #[error("unknown record format {0}")]
    UnknownFormat(u8),

    #[error("matrix resolution {0} is out of range")]
    BadResolution(u8),
}

/// Decoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Single { distance_mm: u16, status: u8 },
    /// Only the first `resolution` zones, in zone order.
    Matrix { distances: Vec<u16>, statuses: Vec<u8> },
}

/// A decoded record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryRecord {
    /// Seconds since epoch; 0 on a channel nothing has been published to.
    pub timestamp: u32,
    /// Raw class byte. See [`SensorClass::from_wire`].
    pub sensor_class: u8,
    pub resolution: u8,
    pub payload: Payload,
}

impl TelemetryRecord {
    /// Class of the publishing sensor, if the byte is known.
    pub fn class(&self) -> Option<SensorClass> {
        SensorClass::from_wire(self.sensor_class)
    }

    /// Whether anything has been published yet.
    pub fn is_empty(&self) -> bool {
        self.timestamp == 0
    }

    pub fn format(&self) -> RecordFormat {
        match self.payload {
            Payload::Single { .. } => RecordFormat::Single,
            Payload::Matrix { .. } => RecordFormat::Matrix,
        }
    }
}

fn write_header(buf: &mut [u8], timestamp: u32, class: SensorClass, resolution: u8, format: RecordFormat) {
    buf[TIMESTAMP..TIMESTAMP + 4].copy_from_slice(&timestamp.to_le_bytes());
    buf[CLASS] = class as u8;
    buf[RESOLUTION] = resolution;
    buf[FORMAT] = format as u8;
    buf[RESERVED] = 0;
}

/// Write a single reading into `buf`.
///
/// # Panics
/// If `buf` is shorter than [`RECORD_SIZE`]. Channels always hand in a
/// full-size mapping.
pub fn encode_single(buf: &mut [u8], timestamp: u32, class: SensorClass, distance_mm: u16, status: u8) {
    write_header(buf, timestamp, class, 1, RecordFormat::Single);
    buf[SINGLE_DISTANCE..SINGLE_DISTANCE + 2].copy_from_slice(&distance_mm.to_le_bytes());
    buf[SINGLE_STATUS] = status;
    buf[SINGLE_STATUS + 1..SINGLE_END].fill(0);
}

/// Write the first `resolution` zones of a matrix reading into `buf`.
///
/// The caller has checked that both slices hold at least `resolution`
/// entries and that `resolution` is at most 64.
pub fn encode_matrix(
    buf: &mut [u8],
    timestamp: u32,
    class: SensorClass,
    resolution: u8,
    distances: &[u16],
    statuses: &[u8],
) {
    let zones = usize::from(resolution).min(MAX_ZONES);
    write_header(buf, timestamp, class, resolution, RecordFormat::Matrix);
    for (zone, distance) in distances.iter().take(zones).enumerate() {
        let offset = MATRIX_DISTANCES + zone * 2;
        buf[offset..offset + 2].copy_from_slice(&distance.to_le_bytes());
    }
    buf[MATRIX_STATUSES..MATRIX_STATUSES + zones].copy_from_slice(&statuses[..zones]);
}

/// Decode a record.
pub fn decode(buf: &[u8]) -> Result<TelemetryRecord, RecordError> {
    if buf.len() < RECORD_SIZE {
        return Err(RecordError::Truncated(buf.len()));
    }
    let timestamp = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let sensor_class = buf[CLASS];
    let resolution = buf[RESOLUTION];

    let payload = match buf[FORMAT] {
        0 => Payload::Single {
            distance_mm: u16::from_le_bytes([buf[SINGLE_DISTANCE], buf[SINGLE_DISTANCE + 1]]),
            status: buf[SINGLE_STATUS],
        },
        1 => {
            let zones = usize::from(resolution);
            if zones == 0 || zones > MAX_ZONES {
                return Err(RecordError::BadResolution(resolution));
            }
            let distances = buf[MATRIX_DISTANCES..MATRIX_DISTANCES + zones * 2]
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            let statuses = buf[MATRIX_STATUSES..MATRIX_STATUSES + zones].to_vec();
            Payload::Matrix { distances, statuses }
        }
        other => return Err(RecordError::UnknownFormat(other)),
    };

    Ok(TelemetryRecord {
        timestamp,
        sensor_class,
        resolution,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_size_matches_wire_contract() {
        assert_eq!(RECORD_SIZE, 200);
        assert_eq!(MATRIX_STATUSES, 136);
    }

    #[test]
    fn test_single_layout() {
        let mut buf = [0xAAu8; RECORD_SIZE];
        encode_single(&mut buf, 0x0102_0304, SensorClass::ColourSensor, 0x1234, 7);

        assert_eq!(&buf[0..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(buf[4], 2);
        assert_eq!(buf[5], 1);
        assert_eq!(buf[6], 0);
        assert_eq!(buf[7], 0);
        assert_eq!(&buf[8..10], &[0x34, 0x12]);
        assert_eq!(buf[10], 7);
        assert!(buf[11..16].iter().all(|&b| b == 0));
        // Beyond the single payload nothing is touched.
        assert!(buf[16..].iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn test_matrix_keeps_inactive_zones() {
        let mut buf = [0u8; RECORD_SIZE];
        let full: Vec<u16> = (0..64).map(|z| 1000 + z).collect();
        encode_matrix(&mut buf, 1, SensorClass::MultiZoneRanger, 64, &full, &[9; 64]);

        let small = [7u16; 16];
        encode_matrix(&mut buf, 2, SensorClass::MultiZoneRanger, 16, &small, &[3; 16]);

        assert_eq!(buf[5], 16);
        assert_eq!(buf[6], 1);
        // Zone 16 still holds the 8x8 frame's value.
        assert_eq!(u16::from_le_bytes([buf[8 + 32], buf[8 + 33]]), 1016);
        assert_eq!(buf[136 + 16], 9);

        let record = decode(&buf).unwrap();
        assert_eq!(record.timestamp, 2);
        assert_eq!(record.format(), RecordFormat::Matrix);
        assert_eq!(
            record.payload,
            Payload::Matrix {
                distances: vec![7; 16],
                statuses: vec![3; 16],
            }
        );
    }

    #[test]
    fn test_zeroed_record_decodes_as_empty() {
        let record = decode(&[0u8; RECORD_SIZE]).unwrap();
        assert!(record.is_empty());
        assert_eq!(record.class(), Some(SensorClass::SingleZoneRanger));
    }

    #[test]
    fn test_corrupt_records_are_rejected() {
        let mut buf = [0u8; RECORD_SIZE];
        buf[FORMAT] = 1;
        buf[RESOLUTION] = 0;
        assert_eq!(decode(&buf), Err(RecordError::BadResolution(0)));

        buf[RESOLUTION] = 65;
        assert_eq!(decode(&buf), Err(RecordError::BadResolution(65)));

        buf[FORMAT] = 4;
        assert_eq!(decode(&buf), Err(RecordError::UnknownFormat(4)));

        assert_eq!(decode(&buf[..10]), Err(RecordError::Truncated(10)));
    }
}
