//! Integration tests for the lifecycle tracker
//!
//! Tests the tracker through its public surface, including:
//! - Single-device invariant under add/remove sequences
//! - Patch/restore round trips across reconfiguration
//! - Concurrent hotplug and reconfiguration callers
//!
//! Run with: `cargo test -p tuner --test tracker_tests`

use std::sync::Arc;
use std::thread;
use tuner::test_utils::{DUALSENSE_DEFAULT_INTERVAL, MockBus, MockDevice};
use tuner::{
    DeviceMatch, EndpointDescriptor, EndpointDirection, HotplugAction, TargetInterval, Tracker,
    Transition,
};

fn tracker(rate: u32) -> Tracker<MockDevice> {
    Tracker::new(DeviceMatch::default(), TargetInterval::clamp(rate))
}

// ============================================================================
// Single-device invariant
// ============================================================================

#[test]
fn test_add_remove_sequences_hold_at_most_one_device() {
    let tracker = tracker(1);
    let devices: Vec<Arc<MockDevice>> = (1..=4).map(|a| MockDevice::dualsense(a).shared()).collect();

    // add 1, add 2, remove 2, add 3, remove 1, add 3, add 4, remove 3
    let script = [
        (HotplugAction::Add, 0),
        (HotplugAction::Add, 1),
        (HotplugAction::Remove, 1),
        (HotplugAction::Add, 2),
        (HotplugAction::Remove, 0),
        (HotplugAction::Add, 2),
        (HotplugAction::Add, 3),
        (HotplugAction::Remove, 2),
    ];

    for (action, idx) in script {
        tracker.on_device_event(action, devices[idx].clone());

        let held: usize = devices
            .iter()
            .map(|d| Arc::strong_count(d) - 1)
            .sum();
        assert!(held <= 1, "tracker holds {} devices", held);
        assert_eq!(held == 1, tracker.is_managing());
    }

    // Device 2 (address 3) was acquired after device 0 left, then removed
    assert!(!tracker.is_managing());
    assert_eq!(devices[1].reset_count(), 0);
    assert_eq!(devices[3].reset_count(), 0);
}

#[test]
fn test_reacquire_after_reconnect_patches_again() {
    let tracker = tracker(1);
    let first = MockDevice::dualsense(5).shared();
    tracker.on_device_event(HotplugAction::Add, first.clone());
    tracker.on_device_event(HotplugAction::Remove, first);

    // Reconnected controller enumerates fresh descriptors
    let second = MockDevice::dualsense(6).shared();
    let transition = tracker.on_device_event(HotplugAction::Add, second.clone());

    assert!(matches!(
        transition,
        Some(Transition::Acquired { patched: true, .. })
    ));
    assert_eq!(second.interval_of(0x84), Some(1));
    assert_eq!(tracker.status().patched_endpoints.len(), 2);
}

// ============================================================================
// Patch/restore behavior
// ============================================================================

#[test]
fn test_startup_scan_then_shutdown_round_trip() {
    let tracker = tracker(1);
    let controller = MockDevice::dualsense(3).shared();
    let bus = MockBus::new(vec![MockDevice::keyboard(2).shared(), controller.clone()]);

    tracker.scan_present(&bus);
    assert_eq!(controller.interval_of(0x84), Some(1));
    assert_eq!(controller.interval_of(0x03), Some(1));

    let transition = tracker.shutdown();
    assert!(matches!(
        transition,
        Some(Transition::Released { restored: true, .. })
    ));
    assert_eq!(controller.interval_of(0x84), Some(DUALSENSE_DEFAULT_INTERVAL));
    assert_eq!(controller.interval_of(0x03), Some(DUALSENSE_DEFAULT_INTERVAL));
}

#[test]
fn test_add_while_scanned_device_managed_is_ignored() {
    let tracker = tracker(1);
    let bus = MockBus::new(vec![MockDevice::dualsense(3).shared()]);
    tracker.scan_present(&bus);

    let late = MockDevice::dualsense(9).shared();
    assert!(
        tracker
            .on_device_event(HotplugAction::Add, late.clone())
            .is_none()
    );
    assert_eq!(late.interval_of(0x84), Some(DUALSENSE_DEFAULT_INTERVAL));
}

#[test]
fn test_restore_after_two_reconfigurations_returns_last_patched_value() {
    let tracker = tracker(2);
    let controller = MockDevice::dualsense(3).shared();
    tracker.on_device_event(HotplugAction::Add, controller.clone());

    tracker.set_target_interval(3);
    tracker.set_target_interval(5);
    assert_eq!(controller.interval_of(0x84), Some(5));

    tracker.shutdown();
    assert_eq!(controller.interval_of(0x84), Some(3));
}

#[test]
fn test_reconfigure_to_current_value_drops_restore_obligation() {
    let tracker = tracker(1);
    let controller = MockDevice::dualsense(3).shared();
    tracker.on_device_event(HotplugAction::Add, controller.clone());

    tracker.set_target_interval(1);
    assert!(tracker.status().patched_endpoints.is_empty());
    assert_eq!(controller.reset_count(), 1);

    let transition = tracker.shutdown();
    assert!(matches!(
        transition,
        Some(Transition::Released {
            restored: false,
            ..
        })
    ));
    assert_eq!(controller.interval_of(0x84), Some(1));
}

#[test]
fn test_capacity_limited_device_round_trip() {
    let tracker = tracker(1);
    let controller = MockDevice::with_hid_endpoints(
        3,
        vec![
            EndpointDescriptor::interrupt(1, EndpointDirection::In, 10),
            EndpointDescriptor::interrupt(2, EndpointDirection::Out, 10),
            EndpointDescriptor::interrupt(3, EndpointDirection::In, 10),
        ],
    )
    .shared();

    tracker.on_device_event(HotplugAction::Add, controller.clone());
    assert_eq!(controller.interval_of(0x83), Some(10));
    assert_eq!(tracker.status().patched_endpoints.len(), 2);

    tracker.shutdown();
    assert_eq!(controller.interval_of(0x81), Some(10));
    assert_eq!(controller.interval_of(0x02), Some(10));
    assert_eq!(controller.interval_of(0x83), Some(10));
}

#[test]
fn test_custom_match_tracks_other_controller() {
    let tracker: Tracker<MockDevice> =
        Tracker::new(DeviceMatch::new(0x046d, 0xc31c), TargetInterval::clamp(2));
    let keyboard = MockDevice::keyboard(4).shared();
    let dualsense = MockDevice::dualsense(5).shared();

    assert!(
        tracker
            .on_device_event(HotplugAction::Add, dualsense.clone())
            .is_none()
    );
    assert!(
        tracker
            .on_device_event(HotplugAction::Add, keyboard.clone())
            .is_some()
    );
    assert_eq!(keyboard.interval_of(0x84), Some(2));
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_concurrent_adds_acquire_once() {
    let tracker = Arc::new(tracker(1));
    let devices: Vec<Arc<MockDevice>> = (1..=8).map(|a| MockDevice::dualsense(a).shared()).collect();

    let handles: Vec<_> = devices
        .iter()
        .cloned()
        .map(|device| {
            let tracker = Arc::clone(&tracker);
            thread::spawn(move || tracker.on_device_event(HotplugAction::Add, device))
        })
        .collect();

    let acquired = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|t| matches!(t, Some(Transition::Acquired { .. })))
        .count();

    assert_eq!(acquired, 1);
    let patched = devices.iter().filter(|d| d.reset_count() > 0).count();
    assert_eq!(patched, 1);
}

#[test]
fn test_reconfigure_racing_remove_never_touches_released_device() {
    for _ in 0..50 {
        let tracker = Arc::new(tracker(1));
        let controller = MockDevice::dualsense(3).shared();
        tracker.on_device_event(HotplugAction::Add, controller.clone());

        let remover = {
            let tracker = Arc::clone(&tracker);
            let controller = controller.clone();
            thread::spawn(move || tracker.on_device_event(HotplugAction::Remove, controller))
        };
        let reconfigurer = {
            let tracker = Arc::clone(&tracker);
            thread::spawn(move || tracker.set_target_interval(4))
        };

        remover.join().unwrap();
        reconfigurer.join().unwrap();

        assert!(!tracker.is_managing());
        assert!(tracker.status().patched_endpoints.is_empty());
        // Either the reconfigure ran first (2 resets) or it found nothing managed (1)
        let resets = controller.reset_count();
        assert!(resets == 1 || resets == 2, "unexpected reset count {}", resets);
        assert!(!controller.is_locked());
    }
}
