//! Buffer headers exchanged between host and component
//!
//! A [`BufferHeader`] is moved by value: whoever holds it owns the backing
//! memory. `empty_this_buffer`/`fill_this_buffer` move it into the component,
//! the done-callbacks move it back. The [`BufferId`] names the port slot the
//! header was registered in; the generation guards against a stale header
//! being presented after its slot was freed and reused.

use crate::types::{Mark, PortIndex};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Per-buffer flags propagated from input to output
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct BufferFlags: u32 {
        /// Final logical unit of the stream
        const EOS = 0x0000_0001;
        /// Timestamp should not be shown to the user
        const DECODE_ONLY = 0x0000_0004;
        /// Payload is known to be corrupt
        const DATA_CORRUPT = 0x0000_0008;
        /// Buffer ends a frame; no boundary search needed
        const END_OF_FRAME = 0x0000_0010;
        /// Key frame
        const SYNC_FRAME = 0x0000_0020;
        /// Payload is codec configuration (SPS/PPS, VOL header, ...)
        const CODEC_CONFIG = 0x0000_0080;
    }
}

/// Handle naming a slot in a port's buffer table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BufferId {
    /// Port the buffer is registered on
    pub port: PortIndex,

    /// Slot index within the port table
    pub slot: usize,

    /// Registration generation of the slot
    pub generation: u64,
}

/// Who supplied the backing memory of a registered buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BufferOrigin {
    /// Host handed in its own memory (`use_buffer`)
    Host,

    /// Component allocated it (`allocate_buffer`)
    Component,
}

/// Descriptor of one buffer and its payload window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferHeader {
    id: BufferId,
    origin: BufferOrigin,
    data: Vec<u8>,

    /// Offset of the first valid byte in `data`
    pub offset: usize,

    /// Number of valid bytes starting at `offset`
    pub filled_len: usize,

    /// Flags for this payload
    pub flags: BufferFlags,

    /// Presentation timestamp in microseconds
    pub timestamp: i64,

    /// Mark carried with this payload
    pub mark: Option<Mark>,
}

impl BufferHeader {
    /// Create a header for a freshly registered slot
    pub fn new(id: BufferId, origin: BufferOrigin, data: Vec<u8>) -> Self {
        Self {
            id,
            origin,
            data,
            offset: 0,
            filled_len: 0,
            flags: BufferFlags::empty(),
            timestamp: 0,
            mark: None,
        }
    }

    /// Slot handle
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Port this buffer belongs to
    pub fn port(&self) -> PortIndex {
        self.id.port
    }

    /// Who supplied the backing memory
    pub fn origin(&self) -> BufferOrigin {
        self.origin
    }

    /// Capacity of the backing memory
    pub fn alloc_len(&self) -> usize {
        self.data.len()
    }

    /// Valid payload bytes
    pub fn payload(&self) -> &[u8] {
        let end = (self.offset + self.filled_len).min(self.data.len());
        let start = self.offset.min(end);
        &self.data[start..end]
    }

    /// Whole backing memory, for the producer to write into
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Replace the payload with `bytes` starting at offset 0
    ///
    /// Returns the number of bytes copied, which is less than `bytes.len()`
    /// when the buffer is too small.
    pub fn write_payload(&mut self, bytes: &[u8]) -> usize {
        let len = bytes.len().min(self.data.len());
        self.data[..len].copy_from_slice(&bytes[..len]);
        self.offset = 0;
        self.filled_len = len;
        len
    }

    /// Append `bytes` after the current payload, returning how many fit
    pub fn append_payload(&mut self, bytes: &[u8]) -> usize {
        let start = self.offset + self.filled_len;
        let room = self.data.len().saturating_sub(start);
        let len = bytes.len().min(room);
        self.data[start..start + len].copy_from_slice(&bytes[..len]);
        self.filled_len += len;
        len
    }

    /// Free space after the current payload
    pub fn remaining_capacity(&self) -> usize {
        self.data.len().saturating_sub(self.offset + self.filled_len)
    }

    /// Drop payload and metadata, keeping the backing memory
    pub fn clear(&mut self) {
        self.offset = 0;
        self.filled_len = 0;
        self.flags = BufferFlags::empty();
        self.timestamp = 0;
        self.mark = None;
    }

    /// Give the backing memory back, consuming the header
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}
