//! Patch/restore engine
//!
//! Walks the interrupt endpoints of a device's HID interface, writes the
//! interval each mode asks for, and resets the device when anything changed.
//! Patch and restore share one walk so the reset step behaves the same in
//! both directions.

use crate::device::UsbDevice;
use crate::interval::{TargetInterval, polling_rate_hz};
use crate::store::IntervalStore;
use tracing::{debug, error, info, warn};

/// Direction of an engine pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Record current intervals and overwrite them with the target
    Patch,
    /// Write back intervals recorded by the last patch
    Restore,
}

/// Apply `mode` to `device`, returning whether any endpoint changed.
///
/// The descriptor walk happens without the reset lock held; the lock is
/// taken only around the reset itself. Every failure is logged and absorbed.
pub fn apply_mode<D: UsbDevice + ?Sized>(
    device: &D,
    store: &mut IntervalStore,
    target: TargetInterval,
    mode: Mode,
) -> bool {
    let walked = device.with_active_config(|config| {
        if mode == Mode::Patch {
            store.clear();
        }

        let Some(setting) = config.hid_interface_mut() else {
            debug!("No HID interface in active configuration");
            return false;
        };

        info!(
            "Found HID interface (bInterfaceNumber {})",
            setting.interface_number
        );

        let mut changed = false;
        for ep in setting.interrupt_endpoints_mut() {
            let address = ep.address();
            let current = ep.interval();

            let wanted = match mode {
                Mode::Patch => {
                    if !store.has_capacity() {
                        warn!(
                            "Interval store full, skipping patch for EP {:#04x}",
                            address
                        );
                        continue;
                    }
                    debug!(
                        "Preparing to patch EP {:#04x} from bInterval {} to {}",
                        address, current, target
                    );
                    target.get()
                }
                Mode::Restore => match store.take_original(address) {
                    Some(original) => {
                        info!("Restoring EP {:#04x} to bInterval {}", address, original);
                        original
                    }
                    None => {
                        warn!("No restore info for EP {:#04x}, skipping", address);
                        continue;
                    }
                },
            };

            if current == wanted {
                continue;
            }

            // A patched endpoint owes a restore; unchanged ones owe nothing
            if mode == Mode::Patch && !store.record_original(address, current) {
                continue;
            }

            ep.set_interval(wanted);
            changed = true;
            info!("EP {:#04x} descriptor bInterval set to {}", address, wanted);
        }
        changed
    });

    let changed = match walked {
        Some(changed) => changed,
        None => {
            info!("Device has no active configuration, nothing to do");
            return false;
        }
    };

    if changed {
        apply_with_reset(device);
        if mode == Mode::Patch {
            info!(
                "Requested polling rate: {:.0} Hz",
                polling_rate_hz(target.get(), device.speed())
            );
        }
    } else {
        info!("No bInterval changes made to device endpoints");
    }

    changed
}

/// Held reset lock, released on drop
struct ResetLock<'a, D: UsbDevice + ?Sized> {
    device: &'a D,
}

impl<'a, D: UsbDevice + ?Sized> ResetLock<'a, D> {
    fn acquire(device: &'a D) -> Option<Self> {
        match device.lock_for_reset() {
            Ok(()) => Some(Self { device }),
            Err(e) => {
                error!("Failed to lock device for reset ({}), resetting anyway", e);
                None
            }
        }
    }
}

impl<D: UsbDevice + ?Sized> Drop for ResetLock<'_, D> {
    fn drop(&mut self) {
        self.device.unlock();
    }
}

/// Reset the device after its descriptor intervals were edited
fn apply_with_reset<D: UsbDevice + ?Sized>(device: &D) {
    info!("Resetting device after bInterval descriptor edits");
    let _lock = ResetLock::acquire(device);

    match device.reset() {
        Ok(()) => info!("Device reset issued"),
        Err(e) => warn!("Device reset failed ({}), descriptor edits kept", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{EndpointDescriptor, EndpointDirection, TransferType};
    use crate::error::DeviceError;
    use crate::test_utils::{AUDIO_ENDPOINT_BASE, AUDIO_INTERVAL, MockDevice};

    fn target(value: u32) -> TargetInterval {
        TargetInterval::clamp(value)
    }

    #[test]
    fn test_patch_then_restore() {
        let device = MockDevice::dualsense(1);
        let mut store = IntervalStore::new();

        assert!(apply_mode(&device, &mut store, target(1), Mode::Patch));
        assert_eq!(device.interval_of(0x84), Some(1));
        assert_eq!(device.interval_of(0x03), Some(1));
        assert_eq!(store.lookup_original(0x84), Some(6));
        assert_eq!(store.lookup_original(0x03), Some(6));
        assert_eq!(device.reset_count(), 1);

        assert!(apply_mode(&device, &mut store, target(1), Mode::Restore));
        assert_eq!(device.interval_of(0x84), Some(6));
        assert_eq!(device.interval_of(0x03), Some(6));
        assert!(store.is_empty());
        assert_eq!(device.reset_count(), 2);
    }

    #[test]
    fn test_second_restore_is_noop() {
        let device = MockDevice::dualsense(1);
        let mut store = IntervalStore::new();

        apply_mode(&device, &mut store, target(2), Mode::Patch);
        assert!(apply_mode(&device, &mut store, target(2), Mode::Restore));
        assert!(!apply_mode(&device, &mut store, target(2), Mode::Restore));
        assert_eq!(device.reset_count(), 2);
    }

    #[test]
    fn test_no_reset_when_nothing_changes() {
        let device = MockDevice::dualsense(1);
        let mut store = IntervalStore::new();

        assert!(!apply_mode(&device, &mut store, target(6), Mode::Patch));
        assert_eq!(device.reset_count(), 0);
        assert_eq!(device.lock_count(), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn test_capacity_boundary() {
        let device = MockDevice::with_hid_endpoints(
            1,
            vec![
                EndpointDescriptor::interrupt(1, EndpointDirection::In, 8),
                EndpointDescriptor::interrupt(2, EndpointDirection::Out, 8),
                EndpointDescriptor::interrupt(3, EndpointDirection::In, 8),
            ],
        );
        let mut store = IntervalStore::new();

        assert!(apply_mode(&device, &mut store, target(1), Mode::Patch));
        assert_eq!(device.interval_of(0x81), Some(1));
        assert_eq!(device.interval_of(0x02), Some(1));
        assert_eq!(device.interval_of(0x83), Some(8));
        assert_eq!(store.lookup_original(0x83), None);

        apply_mode(&device, &mut store, target(1), Mode::Restore);
        assert_eq!(device.interval_of(0x81), Some(8));
        assert_eq!(device.interval_of(0x02), Some(8));
        assert_eq!(device.interval_of(0x83), Some(8));
    }

    #[test]
    fn test_reconfiguration_rebaselines() {
        let device = MockDevice::dualsense(1);
        let mut store = IntervalStore::new();

        apply_mode(&device, &mut store, target(2), Mode::Patch);
        apply_mode(&device, &mut store, target(4), Mode::Patch);
        assert_eq!(store.lookup_original(0x84), Some(2));
        assert_eq!(device.interval_of(0x84), Some(4));

        apply_mode(&device, &mut store, target(4), Mode::Restore);
        assert_eq!(device.interval_of(0x84), Some(2));
    }

    #[test]
    fn test_only_interrupt_endpoints_are_touched() {
        let device = MockDevice::with_hid_endpoints(
            1,
            vec![
                EndpointDescriptor::new(0x81, TransferType::Bulk, 0),
                EndpointDescriptor::interrupt(2, EndpointDirection::In, 10),
            ],
        );
        let mut store = IntervalStore::new();

        apply_mode(&device, &mut store, target(1), Mode::Patch);
        assert_eq!(device.interval_of(0x81), Some(0));
        assert_eq!(device.interval_of(0x82), Some(1));
    }

    #[test]
    fn test_non_hid_interfaces_are_untouched() {
        // HID endpoints share endpoint numbers with nothing else
        let device = MockDevice::with_hid_endpoints(
            1,
            vec![
                EndpointDescriptor::interrupt(1, EndpointDirection::In, 8),
                EndpointDescriptor::interrupt(2, EndpointDirection::In, 8),
            ],
        );
        let audio_in = AUDIO_ENDPOINT_BASE + 1;
        let mut store = IntervalStore::new();

        assert!(apply_mode(&device, &mut store, target(1), Mode::Patch));
        assert_eq!(device.interval_of(0x81), Some(1));
        assert_eq!(device.interval_of(0x82), Some(1));
        assert_eq!(device.interface_interval_of(1, audio_in), Some(AUDIO_INTERVAL));
        assert_eq!(store.lookup_original(audio_in), None);

        apply_mode(&device, &mut store, target(1), Mode::Restore);
        assert_eq!(device.interval_of(0x81), Some(8));
        assert_eq!(device.interval_of(0x82), Some(8));
        assert_eq!(device.interface_interval_of(1, audio_in), Some(AUDIO_INTERVAL));
    }

    #[test]
    fn test_no_active_config_is_noop() {
        let device = MockDevice::unconfigured(1);
        let mut store = IntervalStore::new();
        store.record_original(0x84, 6);

        assert!(!apply_mode(&device, &mut store, target(1), Mode::Patch));
        assert_eq!(device.reset_count(), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_no_hid_interface_is_noop() {
        let device = MockDevice::without_hid(1);
        let mut store = IntervalStore::new();

        assert!(!apply_mode(&device, &mut store, target(1), Mode::Patch));
        assert_eq!(device.reset_count(), 0);
    }

    #[test]
    fn test_lock_failure_still_resets() {
        let device = MockDevice::dualsense(1);
        device.fail_lock(DeviceError::Busy);
        let mut store = IntervalStore::new();

        assert!(apply_mode(&device, &mut store, target(1), Mode::Patch));
        assert_eq!(device.reset_count(), 1);
        assert_eq!(device.unlock_count(), 0);
    }

    #[test]
    fn test_reset_failure_keeps_descriptor_changes() {
        let device = MockDevice::dualsense(1);
        device.fail_reset(DeviceError::NoDevice);
        let mut store = IntervalStore::new();

        assert!(apply_mode(&device, &mut store, target(1), Mode::Patch));
        assert_eq!(device.interval_of(0x84), Some(1));
        assert_eq!(store.lookup_original(0x84), Some(6));
        // Lock is released even though the reset failed
        assert_eq!(device.lock_count(), 1);
        assert_eq!(device.unlock_count(), 1);
        assert!(!device.is_locked());
    }
}
