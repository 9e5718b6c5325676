//! Target polling interval
//!
//! A bInterval value in `1..=255`. Raw input is clamped, never rejected.

use crate::device::DeviceSpeed;
use std::fmt;
use tracing::warn;

/// Smallest valid bInterval
pub const MIN_INTERVAL: u8 = 1;
/// Largest value the one-byte bInterval field can hold
pub const MAX_INTERVAL: u8 = u8::MAX;
/// High-speed intervals are exponents; values above this are out of range
pub const MAX_HIGH_SPEED_INTERVAL: u8 = 16;

/// Validated target bInterval
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TargetInterval(u8);

impl TargetInterval {
    /// Fastest polling (1 ms at full speed, 125 us at high speed)
    pub const FASTEST: TargetInterval = TargetInterval(MIN_INTERVAL);

    /// Clamp a raw value into range: 0 becomes 1, anything above 255 becomes 255
    pub fn clamp(raw: u32) -> Self {
        match raw {
            0 => {
                warn!("Interval 0 is invalid, defaulting to {}", MIN_INTERVAL);
                TargetInterval(MIN_INTERVAL)
            }
            r if r > u32::from(MAX_INTERVAL) => {
                warn!("Interval {} > {}, clamping to {}", r, MAX_INTERVAL, MAX_INTERVAL);
                TargetInterval(MAX_INTERVAL)
            }
            r => TargetInterval(r as u8),
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl Default for TargetInterval {
    fn default() -> Self {
        Self::FASTEST
    }
}

impl fmt::Display for TargetInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Effective polling rate of an interrupt endpoint in Hz
///
/// Low/full speed intervals count 1 ms frames. High speed and faster count
/// 125 us microframes as `2^(interval-1)`, with the exponent capped at 16.
pub fn polling_rate_hz(interval: u8, speed: DeviceSpeed) -> f64 {
    let interval = interval.max(MIN_INTERVAL);
    match speed {
        DeviceSpeed::Low | DeviceSpeed::Full => 1000.0 / f64::from(interval),
        DeviceSpeed::High | DeviceSpeed::Super | DeviceSpeed::SuperPlus => {
            let exponent = interval.min(MAX_HIGH_SPEED_INTERVAL) - 1;
            8000.0 / f64::from(1u32 << exponent)
        }
    }
}
