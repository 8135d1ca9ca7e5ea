//! Error types for tuner operations.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::device::DeviceKind;

/// Errors reported by [`DvbManager`](crate::DvbManager) and
/// [`TunerSession`](crate::TunerSession).
///
/// Every variant leaves the manager in a recoverable state: the next tune or
/// stop resets all descriptors.
#[derive(Error, Debug)]
pub enum TunerError {
    /// A modulation, protocol string or PID was rejected before any
    /// hardware access.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The descriptor provider could not hand out a device.
    #[error("Failed to open {device} device: {source}")]
    DescriptorUnavailable {
        device: DeviceKind,
        #[source]
        source: io::Error,
    },

    /// The driver rejected a programming ioctl.
    #[error("{operation} failed: {source}")]
    HardwareProgramFailed {
        operation: &'static str,
        #[source]
        source: io::Error,
    },

    /// No stable lock was observed within the budget.
    #[error("Frontend did not lock within {}ms", .0.as_millis())]
    LockTimeout(Duration),

    /// A newer tune request is pending.
    #[error("Tune request pending, operation rejected")]
    TuneInProgress,

    /// The stream was read while the frontend had no lock.
    #[error("Frontend is not locked")]
    NotLocked,

    /// Poll or read on the DVR device failed.
    #[error("DVR stream error: {0}")]
    StreamError(#[source] io::Error),
}

impl TunerError {
    pub(crate) fn program(operation: &'static str, source: io::Error) -> Self {
        TunerError::HardwareProgramFailed { operation, source }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TunerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = TunerError::LockTimeout(Duration::from_millis(2000));
        assert_eq!(err.to_string(), "Frontend did not lock within 2000ms");

        let err = TunerError::DescriptorUnavailable {
            device: DeviceKind::Dvr,
            source: io::Error::new(io::ErrorKind::NotFound, "no such device"),
        };
        assert_eq!(err.to_string(), "Failed to open dvr device: no such device");

        let err = TunerError::program("FE_SET_FRONTEND", io::Error::from_raw_os_error(22));
        assert!(err.to_string().starts_with("FE_SET_FRONTEND failed"));
    }
}
