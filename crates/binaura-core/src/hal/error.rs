//! HAL error types

use thiserror::Error;

use super::DeviceId;

/// Errors reported by an audio HAL
///
/// `Setup` failures are fatal to a `start()` attempt and carry the operation
/// that was attempted plus the native status code so the control layer can
/// show something actionable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HalError {
    /// Stream/component setup failed
    #[error("{operation} failed (status {status})")]
    Setup { operation: String, status: i32 },

    /// Numeric device id does not resolve
    #[error("Audio device {0} not found")]
    DeviceNotFound(DeviceId),

    /// Requested stream format rejected by the device
    #[error("Unsupported stream format: {0}")]
    UnsupportedFormat(String),

    /// Host-level failure (enumeration, backend unavailable)
    #[error("Audio host error: {0}")]
    Host(String),
}

impl HalError {
    pub fn setup(operation: impl Into<String>, status: i32) -> Self {
        HalError::Setup {
            operation: operation.into(),
            status,
        }
    }

    /// Native status code, when the failure carries one
    pub fn status(&self) -> Option<i32> {
        match self {
            HalError::Setup { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result type for HAL operations
pub type HalResult<T> = Result<T, HalError>;
