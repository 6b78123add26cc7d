//! Driver error types

use hwcodec_core::CodecError;
use thiserror::Error;

/// Result type alias using `DriverError`
pub type Result<T> = std::result::Result<T, DriverError>;

/// Errors reported by a codec driver
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// Call needs an open driver instance
    #[error("Driver instance is not open")]
    NotOpen,

    /// Driver cannot run this format and class combination
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Configuration key not known to the driver
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Configuration value has the wrong type or range
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue {
        /// Key being set
        key: String,
        /// What was wrong with the value
        reason: String,
    },

    /// The hardware rejected a unit
    #[error("Execution failed: {0}")]
    Execution(String),
}

impl From<DriverError> for CodecError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::UnknownKey(_) | DriverError::InvalidValue { .. } => {
                CodecError::BadParameter(err.to_string())
            }
            DriverError::Unsupported(_) => CodecError::CodecOpen(err.to_string()),
            DriverError::NotOpen | DriverError::Execution(_) => {
                CodecError::Hardware(err.to_string())
            }
        }
    }
}
