//! hwcodec - Component Runtime
//!
//! Gives every hardware codec instance the same lifecycle and buffer
//! protocol:
//! - [`Component`]: state machine, two ports, dispatch and worker threads
//! - [`ResourceManager`]: admission control over the hardware codec slots
//!
//! Codec specifics stay behind [`hwcodec_core::CodecBackend`].
//!
//! # Example
//!
//! ```rust,no_run
//! use hwcodec_component::{Component, ResourceManager};
//! use hwcodec_core::{ChannelHost, CodecBackend, Command, ComponentConfig, ComponentState};
//! use std::sync::Arc;
//!
//! fn start(backend: Box<dyn CodecBackend>) -> hwcodec_core::Result<Component> {
//!     let resources = Arc::new(ResourceManager::default());
//!     let (host, _events) = ChannelHost::new();
//!     let component = Component::new(
//!         ComponentConfig::default(),
//!         backend,
//!         Arc::new(host),
//!         resources,
//!     )?;
//!     component.send_command(Command::StateSet(ComponentState::Idle))?;
//!     Ok(component)
//! }
//! ```

mod component;
mod dispatcher;
mod error;
mod frame;
mod pipeline;
mod port;
mod resource;
mod state_machine;

pub use component::Component;
pub use error::BufferRejected;
pub use frame::TIMESTAMP_TABLE_CAPACITY;
pub use port::{PortDefinition, PortStatus};
pub use resource::{ResourceClient, ResourceManager, ResourceRequest};
