//! Commands accepted by a component's dispatcher

use crate::types::{ComponentState, Mark, PortIndex, PortSelector};
use serde::{Deserialize, Serialize};

/// Command submitted by the host
///
/// Commands are validated on the calling thread and then executed one at a
/// time, in submission order, on the component's dispatch thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Request a state transition
    StateSet(ComponentState),

    /// Return every queued and in-flight buffer on the port(s) with no payload
    Flush(PortSelector),

    /// Flush, wait for buffers to be freed, then disable
    PortDisable(PortSelector),

    /// Enable, then wait for buffers to be supplied
    PortEnable(PortSelector),

    /// Attach a mark to the next buffer queued on the port
    MarkBuffer(PortIndex, Mark),

    /// Tear the component down and stop its dispatcher
    ComponentDeinit,
}

impl Command {
    /// Short name used in logs
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::StateSet(_) => CommandKind::StateSet,
            Command::Flush(_) => CommandKind::Flush,
            Command::PortDisable(_) => CommandKind::PortDisable,
            Command::PortEnable(_) => CommandKind::PortEnable,
            Command::MarkBuffer(..) => CommandKind::MarkBuffer,
            Command::ComponentDeinit => CommandKind::ComponentDeinit,
        }
    }
}

/// Command discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    StateSet,
    Flush,
    PortDisable,
    PortEnable,
    MarkBuffer,
    ComponentDeinit,
}
