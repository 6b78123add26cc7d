//! Codec backend seam
//!
//! The pipeline is generic over [`CodecBackend`]: one implementation per codec
//! family, chosen when the component is built. Backends wrap the hardware
//! driver (open/close/configure/process) and know where frames start in their
//! bitstream format.

use crate::buffer::BufferFlags;
use crate::error::Result;
use crate::types::CodecClass;
use serde::{Deserialize, Serialize};

/// Tag linking a submitted unit to the output it eventually produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameTag(pub u32);

/// Where the logical unit being assembled ends within newly arrived bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameBoundary {
    /// All incoming bytes belong to the unit and it is not complete yet
    Continue,

    /// The unit is complete after the first `n` incoming bytes
    EndsAt(usize),
}

/// One assembled logical unit handed to the codec
#[derive(Debug, Clone, Copy)]
pub struct CodecInput<'a> {
    /// Unit payload (empty for a bare end-of-stream)
    pub data: &'a [u8],

    /// Flags inherited from the host buffers that formed the unit
    pub flags: BufferFlags,

    /// Timestamp of the unit in microseconds
    pub timestamp: i64,

    /// Tag to echo back in [`ProcessResult::Produced`]
    pub tag: FrameTag,
}

/// Result of a successful codec call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessResult {
    /// Output was written to the scratch buffer
    Produced {
        /// Unit the output belongs to (`None` = the unit just submitted)
        tag: Option<FrameTag>,
        /// Flags for the output (key frame, ...)
        flags: BufferFlags,
    },

    /// The codec needs more input before it can emit anything
    NotReady,

    /// The stream changed geometry; the output port must be reconfigured
    PortSettingsChanged,
}

/// Value exchanged through `get_config`/`set_config`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl ConfigValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

/// Codec family implementation driving one hardware codec instance
///
/// All calls may block on the driver. `open`/`close` run on the dispatch
/// thread, `process` on the worker thread, config calls on host threads; the
/// component serializes them.
pub trait CodecBackend: Send {
    /// Family name used in logs
    fn name(&self) -> &str;

    /// Open the driver instance
    fn open(&mut self, class: CodecClass) -> Result<()>;

    /// Close the driver instance; no-op when not open
    fn close(&mut self);

    /// Set a driver configuration value
    fn set_config(&mut self, key: &str, value: ConfigValue) -> Result<()>;

    /// Read a driver configuration value
    fn get_config(&self, key: &str) -> Result<ConfigValue>;

    /// Find the end of the unit being assembled
    ///
    /// `pending` holds the bytes already collected for the unit, `incoming`
    /// the unread bytes of the current host buffer. The default treats every
    /// host buffer as exactly one unit.
    fn check_frame(&self, pending: &[u8], incoming: &[u8]) -> FrameBoundary {
        let _ = pending;
        FrameBoundary::EndsAt(incoming.len())
    }

    /// Run the codec on one unit, writing any output into `output`
    ///
    /// `output` is empty on entry. Returning `Err` is a hard codec error: the
    /// unit is dropped and the pipeline carries on with the next one.
    fn process(&mut self, input: &CodecInput<'_>, output: &mut Vec<u8>) -> Result<ProcessResult>;

    /// Emit one unit the codec still holds, writing it into `output`
    ///
    /// Called repeatedly at end-of-stream until it returns
    /// [`ProcessResult::NotReady`]. Codecs without internal latency keep the
    /// default.
    fn drain(&mut self, output: &mut Vec<u8>) -> Result<ProcessResult> {
        let _ = output;
        Ok(ProcessResult::NotReady)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_value_untagged_json() {
        let v: ConfigValue = serde_json::from_str("42").unwrap();
        assert_eq!(v.as_int(), Some(42));
        let v: ConfigValue = serde_json::from_str("true").unwrap();
        assert_eq!(v.as_bool(), Some(true));
        let v: ConfigValue = serde_json::from_str("\"main\"").unwrap();
        assert_eq!(v, ConfigValue::Text("main".into()));
    }
}
