//! Polling-interval tuner for a single USB HID controller
//!
//! This crate holds the device-independent core of ds-oc: the descriptor
//! model, the interval store that remembers pre-patch values, the
//! patch/restore engine, and the lifecycle tracker that decides when to
//! patch and when to restore. USB access is abstracted behind
//! [`UsbDevice`] and [`DeviceEnumerator`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tuner::test_utils::MockDevice;
//! use tuner::{DeviceMatch, HotplugAction, TargetInterval, Tracker};
//!
//! let tracker = Tracker::new(DeviceMatch::default(), TargetInterval::clamp(1));
//! let controller = Arc::new(MockDevice::dualsense(4));
//!
//! tracker.on_device_event(HotplugAction::Add, controller.clone());
//! assert_eq!(controller.interval_of(0x84), Some(1));
//!
//! tracker.shutdown();
//! assert_eq!(controller.interval_of(0x84), Some(6));
//! ```

pub mod descriptor;
pub mod device;
pub mod engine;
pub mod error;
pub mod interval;
pub mod store;
pub mod test_utils;
pub mod tracker;

pub use descriptor::{
    AltSetting, ConfigDescriptor, EndpointDescriptor, EndpointDirection, Interface, TransferType,
    USB_CLASS_HID,
};
pub use device::{
    DUALSENSE_PRODUCT_ID, DUALSENSE_VENDOR_ID, DeviceEnumerator, DeviceLocation, DeviceMatch,
    DeviceSpeed, HotplugAction, UsbDevice,
};
pub use engine::{Mode, apply_mode};
pub use error::{DeviceError, Result};
pub use interval::{TargetInterval, polling_rate_hz};
pub use store::{EndpointRestoreEntry, IntervalStore, MAX_PATCHED_ENDPOINTS};
pub use tracker::{ManagedInfo, Tracker, TrackerStatus, Transition};
