//! # sensors2shm
//!
//! Shares one I2C bus among several time-of-flight and colour sensors that
//! all wake up at the same address, gives each a unique address, and
//! republishes every sensor's latest reading into its own POSIX
//! shared-memory segment for unrelated reader processes.
//!
//! ## Crate Structure
//!
//! - **`config`**: daemon `Settings` (TOML + environment) and the sensor list parser.
//! - **`validation`**: pre-flight checks that run before any hardware is touched.
//! - **`hardware`**: the bus proxy, enable-line sequencing, the `SensorDriver`
//!   capability and its implementations, and a simulated board.
//! - **`session`**: the per-sensor runtime handle.
//! - **`arbitration`**: one-at-a-time power-up and address assignment.
//! - **`telemetry`**: the shared-memory record, its semaphore, and the
//!   writer and reader sides of a channel.
//! - **`acquisition`**: the polling loop and shutdown.
//! - **`app`**: startup orchestration.
//! - **`daemon`**: background mode and the PID file.
//! - **`logging`**: tracing subscriber setup.
//! - **`error`**: the `DaemonError` taxonomy.

pub mod acquisition;
pub mod app;
pub mod arbitration;
pub mod config;
pub mod core;
pub mod daemon;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod session;
pub mod telemetry;
pub mod validation;
