//! Device lifecycle tracker
//!
//! Owns the single managed-device slot and the interval store. Hotplug
//! events, the startup scan, runtime reconfiguration and shutdown all go
//! through one mutex, so "is a device managed" and the store are always
//! updated together.
//!
//! States:
//! - Unmanaged -> Managed: a matching device shows up (scan or add event);
//!   the tracker keeps a clone of its handle and patches it.
//! - Managed -> Unmanaged on remove: the handle is dropped and the store
//!   cleared. Nothing is restored, the device is gone.
//! - Managed -> Unmanaged on shutdown: intervals are restored while the
//!   handle is still valid, then the handle is dropped.

use crate::device::{DeviceEnumerator, DeviceLocation, DeviceMatch, HotplugAction, UsbDevice};
use crate::engine::{Mode, apply_mode};
use crate::interval::TargetInterval;
use crate::store::{EndpointRestoreEntry, IntervalStore};
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// State change produced by a tracker operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// A device became managed; `patched` is true if any interval changed
    Acquired {
        device: ManagedInfo,
        patched: bool,
    },
    /// The managed device was let go; `restored` is true if any interval
    /// was written back
    Released {
        device: ManagedInfo,
        restored: bool,
    },
}

/// Identity of the managed device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagedInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub location: DeviceLocation,
}

impl ManagedInfo {
    fn of<D: UsbDevice + ?Sized>(device: &D) -> Self {
        Self {
            vendor_id: device.vendor_id(),
            product_id: device.product_id(),
            location: device.location(),
        }
    }
}

/// Snapshot of the tracker for status reporting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerStatus {
    pub managed: Option<ManagedInfo>,
    pub target: TargetInterval,
    pub patched_endpoints: Vec<EndpointRestoreEntry>,
}

struct TrackerState<D> {
    managed: Option<Arc<D>>,
    store: IntervalStore,
    target: TargetInterval,
}

/// Single-device lifecycle tracker
pub struct Tracker<D: UsbDevice> {
    matcher: DeviceMatch,
    state: Mutex<TrackerState<D>>,
}

impl<D: UsbDevice> Tracker<D> {
    pub fn new(matcher: DeviceMatch, target: TargetInterval) -> Self {
        info!("Tracking {} with target bInterval {}", matcher, target);
        Self {
            matcher,
            state: Mutex::new(TrackerState {
                managed: None,
                store: IntervalStore::new(),
                target,
            }),
        }
    }

    pub fn matcher(&self) -> DeviceMatch {
        self.matcher
    }

    pub fn target(&self) -> TargetInterval {
        self.state().target
    }

    pub fn is_managing(&self) -> bool {
        self.state().managed.is_some()
    }

    /// Handle a hotplug notification
    pub fn on_device_event(&self, action: HotplugAction, device: Arc<D>) -> Option<Transition> {
        if !self.matcher.matches(&*device) {
            return None;
        }

        let mut state = self.state();
        match action {
            HotplugAction::Add => Self::acquire(&mut state, device, "connected"),
            HotplugAction::Remove => Self::release_removed(&mut state, &device),
        }
    }

    /// Scan devices already present; stops at the first match
    pub fn scan_present<E>(&self, source: &E) -> Option<Transition>
    where
        E: DeviceEnumerator<Device = D>,
    {
        let mut transition = None;
        source.for_each_present_device(&mut |device: Arc<D>| {
            if !self.matcher.matches(&*device) {
                return ControlFlow::Continue(());
            }
            let mut state = self.state();
            transition = Self::acquire(&mut state, device, "found at startup");
            ControlFlow::Break(())
        });

        if transition.is_none() && !self.is_managing() {
            debug!("No {} present at startup", self.matcher);
        }
        transition
    }

    /// Validate and apply a new target interval.
    ///
    /// Re-patches the managed device, if any, on top of its current
    /// intervals; those become the baseline a later restore returns to.
    pub fn set_target_interval(&self, raw: u32) -> TargetInterval {
        let target = TargetInterval::clamp(raw);
        let mut state = self.state();
        state.target = target;
        info!("Target bInterval changed to {}", target);

        let TrackerState { managed, store, .. } = &mut *state;
        match managed {
            Some(device) => {
                apply_mode(&**device, store, target, Mode::Patch);
            }
            None => info!("Target changed, but no device is currently managed"),
        }
        target
    }

    /// Restore and release the managed device
    pub fn shutdown(&self) -> Option<Transition> {
        let mut state = self.state();
        let TrackerState {
            managed,
            store,
            target,
        } = &mut *state;

        let device = managed.take()?;
        info!("Shutting down, restoring original bInterval values");
        let restored = apply_mode(&*device, store, *target, Mode::Restore);
        store.clear();

        Some(Transition::Released {
            device: ManagedInfo::of(&*device),
            restored,
        })
    }

    pub fn status(&self) -> TrackerStatus {
        let state = self.state();
        TrackerStatus {
            managed: state.managed.as_deref().map(ManagedInfo::of),
            target: state.target,
            patched_endpoints: state.store.entries().copied().collect(),
        }
    }

    fn acquire(state: &mut TrackerState<D>, device: Arc<D>, how: &str) -> Option<Transition> {
        if let Some(current) = &state.managed {
            info!(
                "Another {:04x}:{:04x} {} ({}), but {} is already managed",
                device.vendor_id(),
                device.product_id(),
                how,
                device.location(),
                current.location()
            );
            return None;
        }

        info!(
            "Controller {} (VID:{:#06x}, PID:{:#06x}, {})",
            how,
            device.vendor_id(),
            device.product_id(),
            device.location()
        );

        let TrackerState {
            managed,
            store,
            target,
        } = state;
        let patched = apply_mode(&*device, store, *target, Mode::Patch);
        let info = ManagedInfo::of(&*device);
        *managed = Some(device);

        Some(Transition::Acquired {
            device: info,
            patched,
        })
    }

    fn release_removed(state: &mut TrackerState<D>, device: &D) -> Option<Transition> {
        let is_managed = state
            .managed
            .as_ref()
            .is_some_and(|current| current.location() == device.location());
        if !is_managed {
            return None;
        }

        info!("Managed controller disconnected ({})", device.location());
        let released = state.managed.take()?;
        state.store.clear();

        Some(Transition::Released {
            device: ManagedInfo::of(&*released),
            restored: false,
        })
    }

    fn state(&self) -> MutexGuard<'_, TrackerState<D>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
