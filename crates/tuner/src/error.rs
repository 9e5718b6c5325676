//! Device collaborator error types

use thiserror::Error;

/// Errors reported by a device backend for lock and reset operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// Device (or the entity requested) was not found
    #[error("Device not found")]
    NotFound,

    /// Insufficient permissions to operate on the device
    #[error("Access denied")]
    Access,

    /// Device is busy (lock held elsewhere)
    #[error("Device busy")]
    Busy,

    /// Device has been disconnected
    #[error("No such device (it may have been disconnected)")]
    NoDevice,

    /// Any other backend-specific failure
    #[error("Device error: {0}")]
    Other(String),
}

/// Type alias for device operation results
pub type Result<T> = std::result::Result<T, DeviceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(DeviceError::Busy.to_string(), "Device busy");
        let msg = DeviceError::Other("pipe error".to_string()).to_string();
        assert!(msg.contains("pipe error"));
    }
}
