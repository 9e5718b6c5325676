//! libusb-backed device adapter
//!
//! Wraps a `rusb::Device` and exposes it to the tuner. The active
//! configuration is read once and kept as an owned descriptor tree; interval
//! edits land in that tree and the reset is issued through libusb.

use rusb::{Context, Device, DeviceHandle};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};
use tuner::{
    AltSetting, ConfigDescriptor, DeviceError, DeviceLocation, DeviceSpeed, EndpointDescriptor,
    Interface, TransferType, UsbDevice,
};

/// USB device wrapper with cached descriptors
pub struct RusbDevice {
    /// Underlying rusb device (holding it keeps libusb's reference)
    device: Device<Context>,
    vendor_id: u16,
    product_id: u16,
    /// Active configuration, `None` if the device is unconfigured
    config: Mutex<Option<ConfigDescriptor>>,
    /// Handle opened by `lock_for_reset`, released by `unlock`
    reset_handle: Mutex<Option<DeviceHandle<Context>>>,
}

impl RusbDevice {
    /// Create a new device wrapper
    ///
    /// Reads the device descriptor and, if available, the active
    /// configuration.
    pub fn new(device: Device<Context>) -> Result<Self, rusb::Error> {
        let descriptor = device.device_descriptor()?;

        let config = match device.active_config_descriptor() {
            Ok(config) => Some(convert_config(&config)),
            Err(e) => {
                debug!(
                    "No active configuration on bus {:03} addr {:03}: {}",
                    device.bus_number(),
                    device.address(),
                    e
                );
                None
            }
        };

        Ok(Self {
            vendor_id: descriptor.vendor_id(),
            product_id: descriptor.product_id(),
            device,
            config: Mutex::new(config),
            reset_handle: Mutex::new(None),
        })
    }

    /// Snapshot of the cached active configuration
    pub fn config_snapshot(&self) -> Option<ConfigDescriptor> {
        self.config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl UsbDevice for RusbDevice {
    fn vendor_id(&self) -> u16 {
        self.vendor_id
    }

    fn product_id(&self) -> u16 {
        self.product_id
    }

    fn location(&self) -> DeviceLocation {
        DeviceLocation {
            bus: self.device.bus_number(),
            address: self.device.address(),
        }
    }

    fn speed(&self) -> DeviceSpeed {
        map_device_speed(self.device.speed())
    }

    fn with_active_config<R>(&self, f: impl FnOnce(&mut ConfigDescriptor) -> R) -> Option<R> {
        let mut config = self.config.lock().unwrap_or_else(PoisonError::into_inner);
        config.as_mut().map(f)
    }

    fn lock_for_reset(&self) -> tuner::Result<()> {
        let mut slot = self
            .reset_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(DeviceError::Busy);
        }

        let handle = self.device.open().map_err(map_rusb_error)?;
        debug!("Opened {} for reset", self.location());
        *slot = Some(handle);
        Ok(())
    }

    fn unlock(&self) {
        if self
            .reset_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
        {
            debug!("Closed reset handle for {}", self.location());
        }
    }

    fn reset(&self) -> tuner::Result<()> {
        let mut slot = self
            .reset_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        match slot.as_mut() {
            Some(handle) => handle.reset().map_err(map_rusb_error),
            None => {
                // Lock was not obtained; reset through a short-lived handle
                warn!("Resetting {} without holding the reset lock", self.location());
                let mut handle = self.device.open().map_err(map_rusb_error)?;
                handle.reset().map_err(map_rusb_error)
            }
        }
    }
}

/// Convert a libusb configuration into the tuner's descriptor tree
///
/// libusb does not report which alternate setting is selected; the first
/// (setting 0) is treated as current.
fn convert_config(config: &rusb::ConfigDescriptor) -> ConfigDescriptor {
    let interfaces = config
        .interfaces()
        .map(|interface| Interface {
            current: interface.descriptors().next().map(|setting| AltSetting {
                interface_number: setting.interface_number(),
                setting_number: setting.setting_number(),
                class_code: setting.class_code(),
                endpoints: setting
                    .endpoint_descriptors()
                    .map(|ep| {
                        EndpointDescriptor::new(
                            ep.address(),
                            map_transfer_type(ep.transfer_type()),
                            ep.interval(),
                        )
                    })
                    .collect(),
            }),
        })
        .collect();

    ConfigDescriptor {
        number: config.number(),
        interfaces,
    }
}

fn map_transfer_type(transfer_type: rusb::TransferType) -> TransferType {
    match transfer_type {
        rusb::TransferType::Control => TransferType::Control,
        rusb::TransferType::Isochronous => TransferType::Isochronous,
        rusb::TransferType::Bulk => TransferType::Bulk,
        rusb::TransferType::Interrupt => TransferType::Interrupt,
    }
}

/// Map rusb device speed to tuner DeviceSpeed
fn map_device_speed(speed: rusb::Speed) -> DeviceSpeed {
    match speed {
        rusb::Speed::Low => DeviceSpeed::Low,
        rusb::Speed::Full => DeviceSpeed::Full,
        rusb::Speed::High => DeviceSpeed::High,
        rusb::Speed::Super => DeviceSpeed::Super,
        rusb::Speed::SuperPlus => DeviceSpeed::SuperPlus,
        _ => DeviceSpeed::Full, // Default fallback
    }
}

/// Map rusb errors onto the tuner's collaborator errors
pub fn map_rusb_error(error: rusb::Error) -> DeviceError {
    match error {
        rusb::Error::NotFound => DeviceError::NotFound,
        rusb::Error::Access => DeviceError::Access,
        rusb::Error::Busy => DeviceError::Busy,
        rusb::Error::NoDevice => DeviceError::NoDevice,
        other => DeviceError::Other(other.to_string()),
    }
}
