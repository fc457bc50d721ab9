//! Telemetry channels: shared-memory records guarded by named semaphores.
//!
//! The daemon writes through [`TelemetryChannel`]; other processes attach
//! with [`TelemetryReader`] or any code that follows the same layout and
//! locking (see [`record`]).

pub mod channel;
pub mod reader;
pub mod record;
pub mod semaphore;

pub use channel::{ChannelOptions, TelemetryChannel};
pub use reader::TelemetryReader;
pub use record::{Payload, RecordFormat, TelemetryRecord, RECORD_SIZE};
