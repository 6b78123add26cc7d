//! Error taxonomy shared by every layer of the runtime

use crate::types::{ComponentState, PortIndex};
use thiserror::Error;

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, CodecError>;

/// Runtime errors
///
/// Parameter and state errors are returned synchronously with no side
/// effects. Resource and data-path errors raised during asynchronous work are
/// delivered through [`crate::ComponentEvent::Error`], which is why the type
/// is `Clone`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// A parameter was malformed or out of range
    #[error("Bad parameter: {0}")]
    BadParameter(String),

    /// Port index is not 0 (input) or 1 (output), or not valid for the call
    #[error("Bad port index: {0}")]
    BadPortIndex(u32),

    /// Component is in `Invalid` and only accepts teardown
    #[error("Component is in the invalid state")]
    InvalidState,

    /// Operation is not allowed in the current state
    #[error("Operation not allowed in state {0:?}")]
    IncorrectStateOperation(ComponentState),

    /// Requested state change is not in the legality table
    #[error("Illegal state transition {from:?} -> {to:?}")]
    IncorrectStateTransition {
        /// State the component was in
        from: ComponentState,
        /// State that was requested
        to: ComponentState,
    },

    /// Requested state equals the current state
    #[error("Component is already in state {0:?}")]
    SameState(ComponentState),

    /// No hardware codec slot could be granted
    #[error("Insufficient hardware resources")]
    InsufficientResources,

    /// Hardware slot was taken by a more important component
    #[error("Hardware resources preempted")]
    ResourcesPreempted,

    /// Caller speaks a different major interface version
    #[error("Version mismatch: expected {expected}, got {actual}")]
    VersionMismatch {
        /// Version implemented here
        expected: String,
        /// Version supplied by the caller
        actual: String,
    },

    /// A bounded wait expired
    #[error("Timed out waiting for {0}")]
    Timeout(String),

    /// Opening the codec driver failed
    #[error("Codec open failed: {0}")]
    CodecOpen(String),

    /// Driver reported a hard failure while processing
    #[error("Hardware codec error: {0}")]
    Hardware(String),

    /// Anything else
    #[error("{0}")]
    Undefined(String),
}

impl CodecError {
    /// Create a bad parameter error
    pub fn bad_parameter(msg: impl Into<String>) -> Self {
        Self::BadParameter(msg.into())
    }

    /// Create a hardware error
    pub fn hardware(msg: impl Into<String>) -> Self {
        Self::Hardware(msg.into())
    }

    /// Create a timeout error naming what was awaited
    pub fn timeout(what: impl Into<String>) -> Self {
        Self::Timeout(what.into())
    }

    /// Error for a port that is not valid for the call
    pub fn bad_port(port: PortIndex) -> Self {
        Self::BadPortIndex(port.as_u32())
    }
}
