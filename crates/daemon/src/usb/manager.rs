//! USB device manager
//!
//! Owns the libusb context, the hotplug registration and the lifecycle
//! tracker. Runs in the USB thread; hotplug callbacks only queue notices,
//! which the worker loop hands to the tracker after each event-handling pass.

use crate::usb::device::RusbDevice;
use common::TunerEvent;
use rusb::{Context, Device, Hotplug, HotplugBuilder, Registration, UsbContext};
use std::ops::ControlFlow;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tuner::{
    DeviceEnumerator, DeviceLocation, DeviceMatch, DeviceSpeed, EndpointDescriptor,
    HotplugAction, TargetInterval, Tracker, TrackerStatus, Transition, UsbDevice,
};

/// Hotplug notification queued for the worker loop
struct HotplugNotice {
    action: HotplugAction,
    device: Device<Context>,
}

/// USB device manager
pub struct DeviceManager {
    /// USB context for device operations
    context: Context,
    /// Single-device lifecycle tracker
    tracker: Tracker<RusbDevice>,
    /// Hotplug notices from the libusb callback
    notice_rx: async_channel::Receiver<HotplugNotice>,
    notice_tx: async_channel::Sender<HotplugNotice>,
    /// Hot-plug registration
    _hotplug_registration: Option<Registration<Context>>,
    /// Event sender for tracker transitions
    event_sender: async_channel::Sender<TunerEvent>,
}

impl DeviceManager {
    /// Create a new device manager
    pub fn new(
        event_sender: async_channel::Sender<TunerEvent>,
        matcher: DeviceMatch,
        target: TargetInterval,
    ) -> Result<Self, rusb::Error> {
        let context = Context::new()?;
        let (notice_tx, notice_rx) = async_channel::unbounded();

        Ok(Self {
            context,
            tracker: Tracker::new(matcher, target),
            notice_rx,
            notice_tx,
            _hotplug_registration: None,
            event_sender,
        })
    }

    /// Scan present devices, then register hot-plug callbacks
    ///
    /// This should be called once after creating the manager.
    pub fn initialize(&mut self) -> Result<(), rusb::Error> {
        let present = PresentDevices {
            context: &self.context,
        };
        if let Some(transition) = self.tracker.scan_present(&present) {
            self.publish(transition.into());
        }

        self.register_hotplug()?;

        info!(
            "Device manager initialized, managing: {}",
            self.tracker.is_managing()
        );
        Ok(())
    }

    /// Register hot-plug callbacks for the tracked VID/PID
    fn register_hotplug(&mut self) -> Result<(), rusb::Error> {
        if !rusb::has_hotplug() {
            warn!("libusb has no hotplug support, only devices present at startup are managed");
            return Ok(());
        }

        let matcher = self.tracker.matcher();
        let callback = HotplugCallback {
            notice_tx: self.notice_tx.clone(),
        };

        let registration = HotplugBuilder::new()
            .vendor_id(matcher.vendor_id)
            .product_id(matcher.product_id)
            .enumerate(false) // Startup scan already ran
            .register(&self.context, Box::new(callback))?;

        self._hotplug_registration = Some(registration);
        debug!("Hot-plug callbacks registered for {}", matcher);
        Ok(())
    }

    /// Hand queued hotplug notices to the tracker
    pub fn process_hotplug_notices(&mut self) {
        while let Ok(notice) = self.notice_rx.try_recv() {
            let device = match RusbDevice::new(notice.device) {
                Ok(device) => Arc::new(device),
                Err(e) => {
                    warn!("Failed to read descriptors for hotplug device: {}", e);
                    continue;
                }
            };

            if let Some(transition) = self.tracker.on_device_event(notice.action, device) {
                self.publish(transition.into());
            }
        }
    }

    /// Change the target interval, re-patching the managed device
    pub fn set_target_interval(&mut self, raw: u32) -> TargetInterval {
        let target = self.tracker.set_target_interval(raw);
        self.publish(TunerEvent::TargetChanged { target });
        target
    }

    pub fn status(&self) -> TrackerStatus {
        self.tracker.status()
    }

    /// Unregister hotplug, then restore and release the managed device
    pub fn shutdown(&mut self) -> Option<Transition> {
        if self._hotplug_registration.take().is_some() {
            debug!("Hot-plug callbacks unregistered");
        }
        // Notices queued before unregistering are stale now
        while self.notice_rx.try_recv().is_ok() {}

        let transition = self.tracker.shutdown();
        if let Some(transition) = transition {
            self.publish(transition.into());
        }
        transition
    }

    /// Get USB context
    pub fn context(&self) -> &Context {
        &self.context
    }

    fn publish(&self, event: TunerEvent) {
        if let Err(e) = self.event_sender.try_send(event) {
            error!("Failed to send tuner event: {}", e);
        }
    }
}

/// Devices attached when the daemon starts
struct PresentDevices<'a> {
    context: &'a Context,
}

impl DeviceEnumerator for PresentDevices<'_> {
    type Device = RusbDevice;

    fn for_each_present_device(
        &self,
        visitor: &mut dyn FnMut(Arc<RusbDevice>) -> ControlFlow<()>,
    ) {
        let devices = match self.context.devices() {
            Ok(devices) => devices,
            Err(e) => {
                warn!("Failed to enumerate USB devices: {}", e);
                return;
            }
        };

        for device in devices.iter() {
            match RusbDevice::new(device) {
                Ok(device) => {
                    if visitor(Arc::new(device)).is_break() {
                        break;
                    }
                }
                Err(e) => debug!("Skipping device during enumeration: {}", e),
            }
        }
    }
}

/// Hot-plug callback handler
///
/// Runs inside libusb's event handling, so it only queues the device for
/// the worker loop. The cloned `Device` keeps libusb's reference alive
/// across the handoff.
struct HotplugCallback {
    notice_tx: async_channel::Sender<HotplugNotice>,
}

impl HotplugCallback {
    fn queue(&self, action: HotplugAction, device: Device<Context>) {
        debug!(
            "Hot-plug callback: {:?} (bus={}, addr={})",
            action,
            device.bus_number(),
            device.address()
        );
        if let Err(e) = self.notice_tx.try_send(HotplugNotice { action, device }) {
            error!("Failed to queue hot-plug notice: {}", e);
        }
    }
}

impl Hotplug<Context> for HotplugCallback {
    fn device_arrived(&mut self, device: Device<Context>) {
        self.queue(HotplugAction::Add, device);
    }

    fn device_left(&mut self, device: Device<Context>) {
        self.queue(HotplugAction::Remove, device);
    }
}

/// Descriptor summary of a matching device, for `--list-devices`
#[derive(Debug, Clone)]
pub struct DeviceReport {
    pub vendor_id: u16,
    pub product_id: u16,
    pub location: DeviceLocation,
    pub speed: DeviceSpeed,
    /// bInterfaceNumber of the HID interface, if any
    pub hid_interface: Option<u8>,
    /// Interrupt endpoints of the HID interface
    pub endpoints: Vec<EndpointDescriptor>,
}

/// List present devices matching `matcher` without modifying them
pub fn list_matching_devices(matcher: DeviceMatch) -> Result<Vec<DeviceReport>, rusb::Error> {
    let context = Context::new()?;
    let mut reports = Vec::new();

    for device in context.devices()?.iter() {
        let device = match RusbDevice::new(device) {
            Ok(device) => device,
            Err(e) => {
                debug!("Skipping device: {}", e);
                continue;
            }
        };
        if !matcher.matches(&device) {
            continue;
        }

        let config = device.config_snapshot();
        let hid = config.as_ref().and_then(|c| c.hid_interface());
        reports.push(DeviceReport {
            vendor_id: device.vendor_id(),
            product_id: device.product_id(),
            location: device.location(),
            speed: device.speed(),
            hid_interface: hid.map(|setting| setting.interface_number),
            endpoints: hid
                .map(|setting| setting.interrupt_endpoints().cloned().collect())
                .unwrap_or_default(),
        });
    }

    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manager_creation() {
        let (tx, _rx) = async_channel::bounded(1);

        // Context creation may fail without USB access
        match DeviceManager::new(tx, DeviceMatch::default(), TargetInterval::clamp(1)) {
            Ok(manager) => {
                assert!(!manager.tracker.is_managing());
                assert_eq!(manager.status().target.get(), 1);
            }
            Err(e) => eprintln!("USB context unavailable (expected in CI): {}", e),
        }
    }

    #[test]
    fn test_shutdown_without_device() {
        let (tx, rx) = async_channel::bounded(4);
        let Ok(mut manager) =
            DeviceManager::new(tx, DeviceMatch::default(), TargetInterval::clamp(1))
        else {
            return;
        };

        assert!(manager.shutdown().is_none());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_set_target_publishes_event() {
        let (tx, rx) = async_channel::bounded(4);
        let Ok(mut manager) =
            DeviceManager::new(tx, DeviceMatch::default(), TargetInterval::clamp(1))
        else {
            return;
        };

        assert_eq!(manager.set_target_interval(0).get(), 1);
        assert!(matches!(
            rx.try_recv(),
            Ok(TunerEvent::TargetChanged { target }) if target.get() == 1
        ));
    }
}
