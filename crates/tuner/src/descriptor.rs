//! In-memory USB descriptor model
//!
//! Mirrors the part of a device's active configuration that the tuner walks:
//! interfaces, the current alternate setting of each interface, and the
//! endpoints of that setting. Endpoint intervals are the only mutable field.

/// USB interface class code for Human Interface Devices
pub const USB_CLASS_HID: u8 = 0x03;

const ENDPOINT_DIRECTION_MASK: u8 = 1 << 7;
const ENDPOINT_NUMBER_MASK: u8 = 0x0f;
const ENDPOINT_ATTRIBUTES_TYPE_MASK: u8 = 0x03;

/// Endpoint data direction, derived from bit 7 of the endpoint address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointDirection {
    /// Device to host
    In,
    /// Host to device
    Out,
}

/// Endpoint transfer type (bits 0..1 of bmAttributes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferType {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

impl TransferType {
    /// Decode the transfer type from a raw bmAttributes value
    pub fn from_attributes(attributes: u8) -> Self {
        match attributes & ENDPOINT_ATTRIBUTES_TYPE_MASK {
            0 => TransferType::Control,
            1 => TransferType::Isochronous,
            2 => TransferType::Bulk,
            _ => TransferType::Interrupt,
        }
    }
}

/// Endpoint descriptor with a mutable polling interval
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    address: u8,
    transfer_type: TransferType,
    interval: u8,
}

impl EndpointDescriptor {
    pub fn new(address: u8, transfer_type: TransferType, interval: u8) -> Self {
        Self {
            address,
            transfer_type,
            interval,
        }
    }

    /// Interrupt endpoint in the given direction
    pub fn interrupt(number: u8, direction: EndpointDirection, interval: u8) -> Self {
        let address = match direction {
            EndpointDirection::In => (number & ENDPOINT_NUMBER_MASK) | ENDPOINT_DIRECTION_MASK,
            EndpointDirection::Out => number & ENDPOINT_NUMBER_MASK,
        };
        Self::new(address, TransferType::Interrupt, interval)
    }

    /// bEndpointAddress
    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn number(&self) -> u8 {
        self.address & ENDPOINT_NUMBER_MASK
    }

    pub fn direction(&self) -> EndpointDirection {
        if self.address & ENDPOINT_DIRECTION_MASK != 0 {
            EndpointDirection::In
        } else {
            EndpointDirection::Out
        }
    }

    pub fn transfer_type(&self) -> TransferType {
        self.transfer_type
    }

    /// bInterval
    pub fn interval(&self) -> u8 {
        self.interval
    }

    pub fn set_interval(&mut self, interval: u8) {
        self.interval = interval;
    }

    pub fn is_int_in(&self) -> bool {
        self.transfer_type == TransferType::Interrupt && self.direction() == EndpointDirection::In
    }

    pub fn is_int_out(&self) -> bool {
        self.transfer_type == TransferType::Interrupt && self.direction() == EndpointDirection::Out
    }
}

/// Current alternate setting of an interface
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AltSetting {
    pub interface_number: u8,
    pub setting_number: u8,
    pub class_code: u8,
    pub endpoints: Vec<EndpointDescriptor>,
}

/// Interface of the active configuration
///
/// `current` is `None` when the host has not selected an alternate setting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Interface {
    pub current: Option<AltSetting>,
}

impl Interface {
    pub fn new(current: AltSetting) -> Self {
        Self {
            current: Some(current),
        }
    }
}

/// Active configuration of a device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDescriptor {
    pub number: u8,
    pub interfaces: Vec<Interface>,
}

impl ConfigDescriptor {
    /// First interface whose current setting is HID class
    ///
    /// Only one interface is ever considered; later HID interfaces are ignored.
    pub fn hid_interface(&self) -> Option<&AltSetting> {
        self.interfaces
            .iter()
            .filter_map(|interface| interface.current.as_ref())
            .find(|setting| setting.class_code == USB_CLASS_HID)
    }

    /// Mutable variant of [`ConfigDescriptor::hid_interface`]
    pub fn hid_interface_mut(&mut self) -> Option<&mut AltSetting> {
        self.interfaces
            .iter_mut()
            .filter_map(|interface| interface.current.as_mut())
            .find(|setting| setting.class_code == USB_CLASS_HID)
    }
}

impl AltSetting {
    /// Interrupt endpoints (either direction) of this setting
    pub fn interrupt_endpoints(&self) -> impl Iterator<Item = &EndpointDescriptor> {
        self.endpoints
            .iter()
            .filter(|ep| ep.is_int_in() || ep.is_int_out())
    }

    pub fn interrupt_endpoints_mut(&mut self) -> impl Iterator<Item = &mut EndpointDescriptor> {
        self.endpoints
            .iter_mut()
            .filter(|ep| ep.is_int_in() || ep.is_int_out())
    }
}
