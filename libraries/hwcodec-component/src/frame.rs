//! Frame accumulation and timestamp bookkeeping used by the pipeline

use hwcodec_core::{BufferFlags, FrameTag, Mark};
use std::collections::VecDeque;
use tracing::warn;

/// Maximum number of units in flight inside the codec
pub const TIMESTAMP_TABLE_CAPACITY: usize = 16;

/// Flags that describe a whole logical unit rather than a byte range
pub(crate) const UNIT_FLAGS: BufferFlags = BufferFlags::EOS
    .union(BufferFlags::CODEC_CONFIG)
    .union(BufferFlags::SYNC_FRAME)
    .union(BufferFlags::DECODE_ONLY)
    .union(BufferFlags::DATA_CORRUPT);

/// Working buffer holding one logical unit while it is assembled
///
/// Decoupled from host buffers: a unit may span several input buffers or
/// be one of several units packed in a single buffer.
#[derive(Debug)]
pub(crate) struct ProcessData {
    data: Vec<u8>,
    capacity: usize,
    pub(crate) flags: BufferFlags,
    pub(crate) timestamp: Option<i64>,
    pub(crate) mark: Option<Mark>,
}

impl ProcessData {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
            flags: BufferFlags::empty(),
            timestamp: None,
            mark: None,
        }
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes that still fit
    pub(crate) fn room(&self) -> usize {
        self.capacity.saturating_sub(self.data.len())
    }

    pub(crate) fn extend(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Drop the current unit
    pub(crate) fn reset(&mut self) {
        self.data.clear();
        self.flags = BufferFlags::empty();
        self.timestamp = None;
        self.mark = None;
    }
}

#[derive(Debug, Clone, Copy)]
struct TimestampEntry {
    tag: FrameTag,
    timestamp: i64,
    flags: BufferFlags,
}

/// Maps codec frame tags back to input timestamps and flags
///
/// Codecs that reorder frames (B-frames) emit output in a different order
/// than input was submitted; the tag travels through the codec and picks up
/// the right timestamp on the way out.
#[derive(Debug)]
pub(crate) struct TimestampTable {
    entries: VecDeque<TimestampEntry>,
    next_tag: u32,
}

impl TimestampTable {
    pub(crate) fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(TIMESTAMP_TABLE_CAPACITY),
            next_tag: 0,
        }
    }

    /// Record a unit about to be submitted, evicting the oldest when full
    pub(crate) fn insert(&mut self, timestamp: i64, flags: BufferFlags) -> FrameTag {
        if self.entries.len() == TIMESTAMP_TABLE_CAPACITY {
            if let Some(evicted) = self.entries.pop_front() {
                warn!(
                    tag = evicted.tag.0,
                    timestamp = evicted.timestamp,
                    "timestamp table full, dropping oldest entry"
                );
            }
        }
        let tag = FrameTag(self.next_tag);
        self.next_tag = self.next_tag.wrapping_add(1);
        self.entries.push_back(TimestampEntry {
            tag,
            timestamp,
            flags,
        });
        tag
    }

    /// Remove and return the entry for `tag`
    pub(crate) fn take(&mut self, tag: FrameTag) -> Option<(i64, BufferFlags)> {
        let index = self.entries.iter().position(|entry| entry.tag == tag)?;
        self.entries
            .remove(index)
            .map(|entry| (entry.timestamp, entry.flags))
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Codec output not yet copied into an output buffer
#[derive(Debug)]
pub(crate) struct PendingOutput {
    pub(crate) data: Vec<u8>,

    /// Bytes of `data` already delivered
    pub(crate) offset: usize,
    pub(crate) flags: BufferFlags,
    pub(crate) timestamp: i64,
}

impl PendingOutput {
    pub(crate) fn new(data: Vec<u8>, flags: BufferFlags, timestamp: i64) -> Self {
        Self {
            data,
            offset: 0,
            flags,
            timestamp,
        }
    }

    pub(crate) fn remaining(&self) -> &[u8] {
        &self.data[self.offset.min(self.data.len())..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_data_room() {
        let mut unit = ProcessData::new(8);
        unit.extend(&[1, 2, 3]);
        assert_eq!(unit.room(), 5);
        unit.flags = BufferFlags::EOS;
        unit.timestamp = Some(10);
        unit.reset();
        assert!(unit.is_empty());
        assert_eq!(unit.flags, BufferFlags::empty());
        assert_eq!(unit.timestamp, None);
        assert_eq!(unit.room(), 8);
    }

    #[test]
    fn test_timestamp_lookup_out_of_order() {
        let mut table = TimestampTable::new();
        let a = table.insert(100, BufferFlags::SYNC_FRAME);
        let b = table.insert(200, BufferFlags::empty());
        let c = table.insert(300, BufferFlags::empty());

        assert_eq!(table.take(c), Some((300, BufferFlags::empty())));
        assert_eq!(table.take(a), Some((100, BufferFlags::SYNC_FRAME)));
        assert_eq!(table.take(a), None);
        assert_eq!(table.take(b), Some((200, BufferFlags::empty())));
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_timestamp_table_evicts_oldest() {
        let mut table = TimestampTable::new();
        let first = table.insert(0, BufferFlags::empty());
        for n in 1..=TIMESTAMP_TABLE_CAPACITY as i64 {
            table.insert(n, BufferFlags::empty());
        }
        assert_eq!(table.len(), TIMESTAMP_TABLE_CAPACITY);
        assert_eq!(table.take(first), None);
    }

    #[test]
    fn test_pending_output_remaining() {
        let mut pending = PendingOutput::new(vec![1, 2, 3, 4], BufferFlags::empty(), 0);
        pending.offset = 3;
        assert_eq!(pending.remaining(), &[4]);
        pending.offset = 9;
        assert!(pending.remaining().is_empty());
    }
}
