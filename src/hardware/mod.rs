//! Hardware access: the shared bus, enable lines, and sensor drivers.

pub mod bus;
pub mod capabilities;
pub mod gpio;
pub mod mock;
pub mod registry;
pub mod tcs34725;
pub mod vl53l1x;
#[cfg(feature = "vl53l5cx")]
pub mod vl53l5cx;

pub use bus::BusProxy;
pub use capabilities::{DriverResult, SensorDriver};
pub use gpio::{CdevGpio, EnableLineProvider, PowerSequencer};
pub use registry::{DriverFactory, NativeDriverFactory};
