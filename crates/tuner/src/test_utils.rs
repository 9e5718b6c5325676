//! Test utilities for the tuner
//!
//! Provides an in-memory [`UsbDevice`] with a configurable descriptor tree,
//! counters for lock/reset calls, and injectable failures.
//!
//! # Example
//!
//! ```
//! use tuner::test_utils::MockDevice;
//!
//! let device = MockDevice::dualsense(5);
//! assert_eq!(device.interval_of(0x84), Some(6));
//! assert_eq!(device.reset_count(), 0);
//! ```

use crate::descriptor::{
    AltSetting, ConfigDescriptor, EndpointDescriptor, EndpointDirection, Interface, TransferType,
    USB_CLASS_HID,
};
use crate::device::{
    DUALSENSE_PRODUCT_ID, DUALSENSE_VENDOR_ID, DeviceEnumerator, DeviceLocation, DeviceSpeed,
    UsbDevice,
};
use crate::error::{DeviceError, Result};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// bInterval the DualSense reports for its HID endpoints
pub const DUALSENSE_DEFAULT_INTERVAL: u8 = 6;

const USB_CLASS_AUDIO: u8 = 0x01;

/// Filler audio interfaces 1 and 2 carry isochronous IN endpoints 0x89/0x8a
pub const AUDIO_ENDPOINT_BASE: u8 = 0x88;

/// bInterval of the filler audio endpoints
pub const AUDIO_INTERVAL: u8 = 4;

/// In-memory USB device
#[derive(Debug)]
pub struct MockDevice {
    vendor_id: u16,
    product_id: u16,
    location: DeviceLocation,
    speed: DeviceSpeed,
    config: Mutex<Option<ConfigDescriptor>>,
    lock_error: Mutex<Option<DeviceError>>,
    reset_error: Mutex<Option<DeviceError>>,
    locked: AtomicBool,
    locks: AtomicUsize,
    unlocks: AtomicUsize,
    resets: AtomicUsize,
}

impl MockDevice {
    /// Device with the given identity and active configuration
    pub fn new(
        vendor_id: u16,
        product_id: u16,
        address: u8,
        config: Option<ConfigDescriptor>,
    ) -> Self {
        Self {
            vendor_id,
            product_id,
            location: DeviceLocation { bus: 1, address },
            speed: DeviceSpeed::High,
            config: Mutex::new(config),
            lock_error: Mutex::new(None),
            reset_error: Mutex::new(None),
            locked: AtomicBool::new(false),
            locks: AtomicUsize::new(0),
            unlocks: AtomicUsize::new(0),
            resets: AtomicUsize::new(0),
        }
    }

    /// DualSense layout: three audio interfaces, then HID interface 3 with
    /// interrupt EP 0x84 (IN) and 0x03 (OUT) at bInterval 6
    pub fn dualsense(address: u8) -> Self {
        Self::with_hid_endpoints(
            address,
            vec![
                EndpointDescriptor::interrupt(4, EndpointDirection::In, DUALSENSE_DEFAULT_INTERVAL),
                EndpointDescriptor::interrupt(3, EndpointDirection::Out, DUALSENSE_DEFAULT_INTERVAL),
            ],
        )
    }

    /// DualSense identity with a custom HID endpoint list
    pub fn with_hid_endpoints(address: u8, endpoints: Vec<EndpointDescriptor>) -> Self {
        let mut interfaces: Vec<Interface> = (0..3)
            .map(|number| {
                Interface::new(AltSetting {
                    interface_number: number,
                    setting_number: 0,
                    class_code: USB_CLASS_AUDIO,
                    endpoints: if number == 0 {
                        Vec::new()
                    } else {
                        vec![EndpointDescriptor::new(
                            AUDIO_ENDPOINT_BASE + number,
                            TransferType::Isochronous,
                            AUDIO_INTERVAL,
                        )]
                    },
                })
            })
            .collect();
        interfaces.push(Interface::new(AltSetting {
            interface_number: 3,
            setting_number: 0,
            class_code: USB_CLASS_HID,
            endpoints,
        }));

        Self::new(
            DUALSENSE_VENDOR_ID,
            DUALSENSE_PRODUCT_ID,
            address,
            Some(ConfigDescriptor {
                number: 1,
                interfaces,
            }),
        )
    }

    /// DualSense identity without an active configuration
    pub fn unconfigured(address: u8) -> Self {
        Self::new(DUALSENSE_VENDOR_ID, DUALSENSE_PRODUCT_ID, address, None)
    }

    /// DualSense identity whose configuration has no HID interface
    pub fn without_hid(address: u8) -> Self {
        let config = ConfigDescriptor {
            number: 1,
            interfaces: vec![Interface::new(AltSetting {
                interface_number: 0,
                setting_number: 0,
                class_code: USB_CLASS_AUDIO,
                endpoints: vec![EndpointDescriptor::interrupt(1, EndpointDirection::In, 6)],
            })],
        };
        Self::new(DUALSENSE_VENDOR_ID, DUALSENSE_PRODUCT_ID, address, Some(config))
    }

    /// Some other HID device (a keyboard) with the DualSense endpoint layout
    pub fn keyboard(address: u8) -> Self {
        let mut device = Self::dualsense(address);
        device.vendor_id = 0x046d;
        device.product_id = 0xc31c;
        device
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Current bInterval of an endpoint of the HID interface
    pub fn interval_of(&self, address: u8) -> Option<u8> {
        let config = self.config.lock().unwrap_or_else(PoisonError::into_inner);
        config
            .as_ref()?
            .hid_interface()?
            .endpoints
            .iter()
            .find(|ep| ep.address() == address)
            .map(|ep| ep.interval())
    }

    /// Current bInterval of an endpoint of interface `interface_number`
    pub fn interface_interval_of(&self, interface_number: u8, address: u8) -> Option<u8> {
        let config = self.config.lock().unwrap_or_else(PoisonError::into_inner);
        config
            .as_ref()?
            .interfaces
            .iter()
            .filter_map(|interface| interface.current.as_ref())
            .find(|setting| setting.interface_number == interface_number)?
            .endpoints
            .iter()
            .find(|ep| ep.address() == address)
            .map(|ep| ep.interval())
    }

    /// Make subsequent `lock_for_reset` calls fail
    pub fn fail_lock(&self, error: DeviceError) {
        *self.lock_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    /// Make subsequent `reset` calls fail
    pub fn fail_reset(&self, error: DeviceError) {
        *self.reset_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    pub fn reset_count(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    pub fn lock_count(&self) -> usize {
        self.locks.load(Ordering::SeqCst)
    }

    pub fn unlock_count(&self) -> usize {
        self.unlocks.load(Ordering::SeqCst)
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }
}

impl UsbDevice for MockDevice {
    fn vendor_id(&self) -> u16 {
        self.vendor_id
    }

    fn product_id(&self) -> u16 {
        self.product_id
    }

    fn location(&self) -> DeviceLocation {
        self.location
    }

    fn speed(&self) -> DeviceSpeed {
        self.speed
    }

    fn with_active_config<R>(&self, f: impl FnOnce(&mut ConfigDescriptor) -> R) -> Option<R> {
        let mut config = self.config.lock().unwrap_or_else(PoisonError::into_inner);
        config.as_mut().map(f)
    }

    fn lock_for_reset(&self) -> Result<()> {
        if let Some(error) = self
            .lock_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Err(error);
        }
        if self.locked.swap(true, Ordering::SeqCst) {
            return Err(DeviceError::Busy);
        }
        self.locks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn unlock(&self) {
        self.locked.store(false, Ordering::SeqCst);
        self.unlocks.fetch_add(1, Ordering::SeqCst);
    }

    fn reset(&self) -> Result<()> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        match self
            .reset_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Fixed list of present devices for startup scans
#[derive(Debug, Default)]
pub struct MockBus {
    devices: Vec<Arc<MockDevice>>,
    visited: AtomicUsize,
}

impl MockBus {
    pub fn new(devices: Vec<Arc<MockDevice>>) -> Self {
        Self {
            devices,
            visited: AtomicUsize::new(0),
        }
    }

    /// Number of devices handed to visitors so far
    pub fn visited(&self) -> usize {
        self.visited.load(Ordering::SeqCst)
    }
}

impl DeviceEnumerator for MockBus {
    type Device = MockDevice;

    fn for_each_present_device(
        &self,
        visitor: &mut dyn FnMut(Arc<MockDevice>) -> ControlFlow<()>,
    ) {
        for device in &self.devices {
            self.visited.fetch_add(1, Ordering::SeqCst);
            if visitor(Arc::clone(device)).is_break() {
                break;
            }
        }
    }
}
