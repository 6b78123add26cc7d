//! Simulator errors

use hwcodec_core::CodecError;
use thiserror::Error;

/// Simulator errors
#[derive(Debug, Error)]
pub enum SimError {
    /// Configuration could not be loaded or is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// A component call or transition failed
    #[error("Component {name}: {source}")]
    Component {
        /// Component name
        name: String,
        #[source]
        source: CodecError,
    },

    /// Nothing arrived from a component in time
    #[error("Component {name}: timed out waiting for {what}")]
    Timeout {
        /// Component name
        name: String,
        /// What the host was waiting for
        what: String,
    },

    /// A component's host thread panicked
    #[error("Host thread for {0} panicked")]
    Panicked(String),
}

impl SimError {
    pub fn component(name: &str, source: CodecError) -> Self {
        Self::Component {
            name: name.to_string(),
            source,
        }
    }

    pub fn timeout(name: &str, what: impl Into<String>) -> Self {
        Self::Timeout {
            name: name.to_string(),
            what: what.into(),
        }
    }
}

/// Result type for simulator operations
pub type Result<T> = std::result::Result<T, SimError>;
