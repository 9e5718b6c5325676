//! Device collaborator interfaces
//!
//! The tuner never talks to USB hardware directly. A backend (libusb in the
//! daemon, [`crate::test_utils::MockDevice`] in tests) implements
//! [`UsbDevice`] for descriptor access and the reset primitive, and
//! [`DeviceEnumerator`] for the startup scan.

use crate::descriptor::ConfigDescriptor;
use crate::error::Result;
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;

/// Sony Interactive Entertainment
pub const DUALSENSE_VENDOR_ID: u16 = 0x054c;
/// DualSense wireless controller
pub const DUALSENSE_PRODUCT_ID: u16 = 0x0ce6;

/// Bus position of a connected device
///
/// Identifies the physical device for as long as it stays connected, so a
/// remove notification can be matched against the managed device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceLocation {
    pub bus: u8,
    pub address: u8,
}

impl fmt::Display for DeviceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bus {:03} addr {:03}", self.bus, self.address)
    }
}

/// USB device speed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceSpeed {
    /// Low speed - 1.5 Mbps
    Low,
    /// Full speed - 12 Mbps
    #[default]
    Full,
    /// High speed - 480 Mbps
    High,
    /// SuperSpeed - 5 Gbps
    Super,
    /// SuperSpeed+ - 10 Gbps
    SuperPlus,
}

/// Hotplug notification kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotplugAction {
    Add,
    Remove,
}

/// A USB device as seen by the tuner
///
/// Implementations are shared through `Arc`; holding a clone is the ownership
/// token that keeps the device alive while it is managed.
pub trait UsbDevice: Send + Sync {
    fn vendor_id(&self) -> u16;

    fn product_id(&self) -> u16;

    fn location(&self) -> DeviceLocation;

    fn speed(&self) -> DeviceSpeed {
        DeviceSpeed::Full
    }

    /// Run `f` with mutable access to the active configuration descriptors.
    ///
    /// Returns `None` without calling `f` when the device has no active
    /// configuration.
    fn with_active_config<R>(&self, f: impl FnOnce(&mut ConfigDescriptor) -> R) -> Option<R>;

    /// Take the device-level lock that guards a reset
    fn lock_for_reset(&self) -> Result<()>;

    /// Release the lock taken by [`UsbDevice::lock_for_reset`]
    fn unlock(&self);

    /// Reset the device so descriptor changes take effect.
    ///
    /// May invalidate open handles on the device.
    fn reset(&self) -> Result<()>;
}

/// Source of devices already present when the tuner starts
pub trait DeviceEnumerator {
    type Device: UsbDevice;

    /// Visit present devices until the visitor breaks
    fn for_each_present_device(
        &self,
        visitor: &mut dyn FnMut(Arc<Self::Device>) -> ControlFlow<()>,
    );
}

/// Vendor/product identity the tuner manages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceMatch {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl Default for DeviceMatch {
    fn default() -> Self {
        Self {
            vendor_id: DUALSENSE_VENDOR_ID,
            product_id: DUALSENSE_PRODUCT_ID,
        }
    }
}

impl DeviceMatch {
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }

    pub fn matches_ids(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }

    pub fn matches<D: UsbDevice + ?Sized>(&self, device: &D) -> bool {
        self.matches_ids(device.vendor_id(), device.product_id())
    }
}

impl fmt::Display for DeviceMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}
