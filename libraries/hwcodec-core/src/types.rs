//! Core vocabulary: states, ports, identities

use serde::{Deserialize, Serialize};
use std::fmt;

/// Component lifecycle state
///
/// Names and ordering are part of the host contract and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentState {
    /// Unrecoverable; only teardown is accepted
    Invalid,

    /// Created, no buffers and no hardware slot
    Loaded,

    /// Parked until the resource manager frees a hardware slot
    WaitForResources,

    /// Hardware slot held, buffers allocated, pipeline not running
    Idle,

    /// Pipeline running
    Executing,

    /// Pipeline suspended, buffers retained
    Pause,
}

impl ComponentState {
    /// All states, in contract order
    pub const ALL: [ComponentState; 6] = [
        ComponentState::Invalid,
        ComponentState::Loaded,
        ComponentState::WaitForResources,
        ComponentState::Idle,
        ComponentState::Executing,
        ComponentState::Pause,
    ];

    /// Whether the component holds a hardware slot and allocated buffers
    pub fn has_resources(self) -> bool {
        matches!(
            self,
            ComponentState::Idle | ComponentState::Executing | ComponentState::Pause
        )
    }
}

/// Check the transition legality table
///
/// `Invalid` as a target is always accepted here: the trapdoor performs its
/// cleanup and then reports [`crate::CodecError::InvalidState`] itself.
pub fn is_legal_transition(from: ComponentState, to: ComponentState) -> bool {
    use ComponentState::*;

    if from == Invalid || from == to {
        return false;
    }

    matches!(
        (from, to),
        (_, Invalid)
            | (Loaded, Idle)
            | (Loaded, WaitForResources)
            | (WaitForResources, Loaded)
            | (WaitForResources, Idle)
            | (Idle, Loaded)
            | (Idle, Executing)
            | (Idle, Pause)
            | (Executing, Idle)
            | (Executing, Pause)
            | (Pause, Idle)
            | (Pause, Executing)
    )
}

/// Sub-state held only while a multi-step transition is in progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransientState {
    /// No transition in progress
    #[default]
    None,
    LoadedToIdle,
    IdleToLoaded,
    IdleToExecuting,
    ExecutingToIdle,
}

/// Port role, doubling as the wire index (0 = input, 1 = output)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PortIndex {
    /// Compressed (decode) or raw (encode) data coming from the host
    Input = 0,

    /// Data produced by the codec going back to the host
    Output = 1,
}

impl PortIndex {
    /// Both ports in index order
    pub const BOTH: [PortIndex; 2] = [PortIndex::Input, PortIndex::Output];

    /// Array slot for this port
    pub fn as_usize(self) -> usize {
        self as usize
    }

    /// Wire index for this port
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for PortIndex {
    type Error = crate::CodecError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PortIndex::Input),
            1 => Ok(PortIndex::Output),
            other => Err(crate::CodecError::BadPortIndex(other)),
        }
    }
}

/// Which ports a flush/enable/disable command applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortSelector {
    /// A single port
    Port(PortIndex),

    /// Input and output
    All,
}

impl PortSelector {
    /// Ports covered by this selector
    pub fn ports(self) -> Vec<PortIndex> {
        match self {
            PortSelector::Port(port) => vec![port],
            PortSelector::All => PortIndex::BOTH.to_vec(),
        }
    }
}

impl From<PortIndex> for PortSelector {
    fn from(port: PortIndex) -> Self {
        PortSelector::Port(port)
    }
}

/// Hardware pool a component draws from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecClass {
    Decode,
    Encode,
}

/// Identity issued by the resource manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentId(pub u32);

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Marker attached to a buffer and reported by the component it targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mark {
    /// Component that fires the mark event
    pub target: ComponentId,

    /// Opaque host data echoed back in the event
    pub data: u64,
}

/// Interface version carried by parameter structures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    /// Version implemented by this runtime
    pub const CURRENT: Version = Version { major: 1, minor: 1 };

    /// Parameter structures are accepted when the major versions agree
    pub fn is_compatible(self, other: Version) -> bool {
        self.major == other.major
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}
