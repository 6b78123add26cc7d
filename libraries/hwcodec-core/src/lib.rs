//! hwcodec - Core Types
//!
//! Shared vocabulary for the hardware codec component runtime.
//!
//! This crate provides:
//! - Component states, transition legality and commands
//! - Buffer headers, flags and marks exchanged with the host
//! - Host callback and tunnel traits
//! - The [`CodecBackend`] seam implemented once per codec family
//! - Counting semaphore and manual-reset signal with timeouts
//! - Component and resource pool configuration
//!
//! # Example
//!
//! ```rust
//! use hwcodec_core::{is_legal_transition, ComponentState, PortIndex};
//!
//! assert!(is_legal_transition(ComponentState::Loaded, ComponentState::Idle));
//! assert!(!is_legal_transition(ComponentState::Loaded, ComponentState::Executing));
//! assert_eq!(PortIndex::try_from(1).unwrap(), PortIndex::Output);
//! ```

mod backend;
mod buffer;
mod command;
pub mod config;
mod error;
mod events;
pub mod sync;
mod types;

// Public exports
pub use backend::{CodecBackend, CodecInput, ConfigValue, FrameBoundary, FrameTag, ProcessResult};
pub use buffer::{BufferFlags, BufferHeader, BufferId, BufferOrigin};
pub use command::{Command, CommandKind};
pub use config::{ComponentConfig, PortConfig, ResourceLimits};
pub use error::{CodecError, Result};
pub use events::{
    ChannelHost, ComponentEvent, HostCallbacks, HostMessage, HostReceiver, TunnelPeer,
};
pub use types::{
    is_legal_transition, CodecClass, ComponentId, ComponentState, Mark, PortIndex, PortSelector,
    TransientState, Version,
};
