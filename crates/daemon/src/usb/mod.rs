//! USB subsystem
//!
//! Connects the tuner to real hardware through libusb:
//! - Device wrapper exposing descriptors and reset to the tuner
//! - Startup enumeration and hot-plug registration
//! - Worker thread running the libusb event loop
//!
//! The USB subsystem runs in a dedicated thread so blocking resets never
//! stall the Tokio runtime.

pub mod device;
pub mod manager;
pub mod worker;

pub use manager::{DeviceReport, list_matching_devices};
pub use worker::spawn_tuner_worker;
