//! Low-level FFI bindings for the ST VL53L5CX ultra-lite driver.
//!
//! The ULD keeps all device state in a caller-owned
//! `VL53L5CX_Configuration` block and talks to the sensor through a
//! platform layer. The Linux platform layer expected here stores the
//! 8-bit bus address and an open `/dev/i2c-N` descriptor in
//! `VL53L5CX_Platform { address, fd }`.
//!
//! # Safety
//!
//! Every function is a raw binding. The configuration block must stay
//! at a fixed address for as long as the driver uses it.
//!
//! # Features
//!
//! - `uld-sdk`: generate bindings from the vendor headers and link
//!   `libvl53l5cx_uld`. Without it only layout constants are provided.

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]
#![allow(dead_code)]
#![allow(missing_docs)]
#![allow(clippy::all)]

include!(concat!(env!("OUT_DIR"), "/bindings.rs"));
