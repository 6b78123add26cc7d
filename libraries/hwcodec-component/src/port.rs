//! Port model: buffer slot arena, FIFO queue and rendezvous signals
//!
//! Each component owns two ports by value. A port keeps a fixed table of
//! slots; registering a buffer claims the first free slot and hands the host
//! a [`BufferHeader`] whose [`BufferId`] names that slot. The header itself
//! travels by value between host and component, the slot only records who
//! currently holds it.
//!
//! Lock order: component state lock, then `inner`, then `data`.

use crate::error::BufferRejected;
use hwcodec_core::sync::{lock, Semaphore, Signal};
use hwcodec_core::{
    BufferHeader, BufferId, BufferOrigin, CodecError, Mark, PortConfig, PortIndex, Result,
    TunnelPeer, Version,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// Buffer requirements and status of a port, as exchanged with the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortDefinition {
    /// Interface version of the structure
    pub version: Version,

    pub index: PortIndex,

    /// Number of buffers the host will supply
    pub buffer_count: usize,

    /// Smallest acceptable `buffer_count` (read-only)
    pub min_buffer_count: usize,

    /// Minimum size of each buffer in bytes
    pub buffer_size: usize,

    pub enabled: bool,

    /// Every slot holds a registered buffer (read-only)
    pub populated: bool,
}

/// Snapshot of a port's flags and counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortStatus {
    pub enabled: bool,
    pub populated: bool,
    pub being_flushed: bool,
    pub being_disabled: bool,
    pub invalid: bool,
    pub tunneled: bool,

    /// Slots holding a registered buffer
    pub registered: usize,

    /// Buffers waiting in the FIFO
    pub queued: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Free,
    Registered {
        origin: BufferOrigin,
        generation: u64,
        /// Ownership currently lies with the component (queued or in flight)
        with_component: bool,
    },
}

/// The in-flight buffer of a port and how much of it the pipeline has used
#[derive(Debug, Default)]
pub(crate) struct DataBuffer {
    header: Option<BufferHeader>,
    used: usize,
}

impl DataBuffer {
    pub(crate) fn is_empty(&self) -> bool {
        self.header.is_none()
    }

    pub(crate) fn header(&self) -> Option<&BufferHeader> {
        self.header.as_ref()
    }

    pub(crate) fn header_mut(&mut self) -> Option<&mut BufferHeader> {
        self.header.as_mut()
    }

    /// Payload not yet consumed
    pub(crate) fn remaining(&self) -> &[u8] {
        match &self.header {
            Some(header) => {
                let payload = header.payload();
                &payload[self.used.min(payload.len())..]
            }
            None => &[],
        }
    }

    pub(crate) fn consume(&mut self, len: usize) {
        self.used += len;
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.remaining().is_empty()
    }

    pub(crate) fn load(&mut self, header: BufferHeader) {
        self.header = Some(header);
        self.used = 0;
    }

    pub(crate) fn take(&mut self) -> Option<BufferHeader> {
        self.used = 0;
        self.header.take()
    }
}

struct PortInner {
    config: PortConfig,
    enabled: bool,
    populated: bool,
    being_flushed: bool,
    being_disabled: bool,
    invalid: bool,
    slots: Vec<Slot>,
    generation: u64,
    queue: VecDeque<BufferHeader>,
    pending_marks: VecDeque<Mark>,
    tunnel: Option<Arc<dyn TunnelPeer>>,
}

impl PortInner {
    fn registered(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot, Slot::Registered { .. }))
            .count()
    }

    /// Check that `id` names a live registration on this port
    fn slot_of(&self, index: PortIndex, id: BufferId) -> Result<usize> {
        if id.port != index {
            return Err(CodecError::BadPortIndex(id.port.as_u32()));
        }
        match self.slots.get(id.slot) {
            Some(Slot::Registered { generation, .. }) if *generation == id.generation => {
                Ok(id.slot)
            }
            _ => Err(CodecError::bad_parameter(format!(
                "buffer {}:{} is not registered on the {:?} port",
                id.slot, id.generation, index
            ))),
        }
    }
}

/// One directional buffer-exchange endpoint
pub(crate) struct Port {
    index: PortIndex,
    inner: Mutex<PortInner>,

    /// Count equals the queue depth
    pub(crate) semaphore: Semaphore,

    /// Set while every slot is registered
    pub(crate) loaded: Signal,

    /// Set while no slot is registered
    pub(crate) unloaded: Signal,

    pub(crate) data: Mutex<DataBuffer>,
}

impl Port {
    pub(crate) fn new(index: PortIndex, config: PortConfig) -> Self {
        Self {
            index,
            inner: Mutex::new(PortInner {
                config,
                enabled: config.enabled,
                populated: false,
                being_flushed: false,
                being_disabled: false,
                invalid: false,
                slots: vec![Slot::Free; config.buffer_count],
                generation: 0,
                queue: VecDeque::new(),
                pending_marks: VecDeque::new(),
                tunnel: None,
            }),
            semaphore: Semaphore::new(0),
            loaded: Signal::new(false),
            unloaded: Signal::new(true),
            data: Mutex::new(DataBuffer::default()),
        }
    }

    pub(crate) fn index(&self) -> PortIndex {
        self.index
    }

    fn inner(&self) -> MutexGuard<'_, PortInner> {
        lock(&self.inner)
    }

    pub(crate) fn status(&self) -> PortStatus {
        let inner = self.inner();
        PortStatus {
            enabled: inner.enabled,
            populated: inner.populated,
            being_flushed: inner.being_flushed,
            being_disabled: inner.being_disabled,
            invalid: inner.invalid,
            tunneled: inner.tunnel.is_some(),
            registered: inner.registered(),
            queued: inner.queue.len(),
        }
    }

    /// Ready for the pipeline: enabled, settled and fully supplied
    pub(crate) fn is_ready(&self) -> bool {
        let inner = self.inner();
        inner.enabled
            && !inner.being_flushed
            && !inner.being_disabled
            && !inner.invalid
            && (inner.populated || inner.tunnel.is_some())
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.inner().enabled
    }

    #[cfg(test)]
    pub(crate) fn is_populated(&self) -> bool {
        self.inner().populated
    }

    pub(crate) fn is_tunneled(&self) -> bool {
        self.inner().tunnel.is_some()
    }

    /// Enabled ports that take part in buffer rendezvous
    pub(crate) fn needs_rendezvous(&self) -> bool {
        let inner = self.inner();
        inner.enabled && inner.tunnel.is_none()
    }

    pub(crate) fn definition(&self) -> PortDefinition {
        let inner = self.inner();
        PortDefinition {
            version: Version::CURRENT,
            index: self.index,
            buffer_count: inner.config.buffer_count,
            min_buffer_count: inner.config.min_buffer_count,
            buffer_size: inner.config.buffer_size,
            enabled: inner.enabled,
            populated: inner.populated,
        }
    }

    /// Apply new buffer requirements; only possible with no buffer registered
    pub(crate) fn set_definition(&self, definition: &PortDefinition) -> Result<()> {
        let mut inner = self.inner();
        if inner.registered() > 0 {
            return Err(CodecError::bad_parameter(format!(
                "{:?} port still has registered buffers",
                self.index
            )));
        }
        let config = PortConfig {
            buffer_count: definition.buffer_count,
            min_buffer_count: inner.config.min_buffer_count,
            buffer_size: definition.buffer_size,
            enabled: inner.config.enabled,
        };
        config.validate()?;
        inner.config = config;
        inner.slots = vec![Slot::Free; config.buffer_count];
        inner.populated = false;
        Ok(())
    }

    pub(crate) fn set_tunnel(&self, peer: Option<Arc<dyn TunnelPeer>>) {
        self.inner().tunnel = peer;
    }

    pub(crate) fn tunnel(&self) -> Option<Arc<dyn TunnelPeer>> {
        self.inner().tunnel.clone()
    }

    /// Whether a buffer may be registered right now
    pub(crate) fn accepts_registration(&self) -> bool {
        let inner = self.inner();
        inner.enabled && !inner.populated && !inner.invalid
    }

    /// Claim the first free slot for `data`
    pub(crate) fn register(&self, origin: BufferOrigin, data: Vec<u8>) -> Result<BufferHeader> {
        let mut inner = self.inner();
        if data.len() < inner.config.buffer_size {
            return Err(CodecError::bad_parameter(format!(
                "buffer of {} bytes is smaller than the required {}",
                data.len(),
                inner.config.buffer_size
            )));
        }
        let Some(slot) = inner.slots.iter().position(|slot| *slot == Slot::Free) else {
            return Err(CodecError::bad_parameter(format!(
                "all {} slots of the {:?} port are taken",
                inner.slots.len(),
                self.index
            )));
        };

        inner.generation += 1;
        let generation = inner.generation;
        inner.slots[slot] = Slot::Registered {
            origin,
            generation,
            with_component: false,
        };

        self.unloaded.reset();
        if inner.registered() == inner.slots.len() {
            inner.populated = true;
            self.loaded.set();
        }

        let id = BufferId {
            port: self.index,
            slot,
            generation,
        };
        Ok(BufferHeader::new(id, origin, data))
    }

    /// Release the slot named by `header`
    pub(crate) fn unregister(&self, header: &BufferHeader) -> Result<()> {
        let mut inner = self.inner();
        let slot = inner.slot_of(self.index, header.id())?;
        if let Slot::Registered {
            with_component: true,
            ..
        } = inner.slots[slot]
        {
            return Err(CodecError::bad_parameter(
                "buffer is still owned by the component",
            ));
        }

        inner.slots[slot] = Slot::Free;
        inner.populated = false;
        self.loaded.reset();
        if inner.registered() == 0 {
            self.unloaded.set();
        }
        Ok(())
    }

    /// Hand a buffer to the component and wake the pipeline
    pub(crate) fn enqueue(
        &self,
        mut header: BufferHeader,
    ) -> std::result::Result<(), BufferRejected> {
        let mut inner = self.inner();
        let slot = match inner.slot_of(self.index, header.id()) {
            Ok(slot) => slot,
            Err(error) => return Err(BufferRejected::new(error, header)),
        };
        if !inner.enabled || inner.being_flushed || inner.being_disabled || inner.invalid {
            let error = CodecError::bad_parameter(format!(
                "{:?} port is not accepting buffers",
                self.index
            ));
            return Err(BufferRejected::new(error, header));
        }

        match &mut inner.slots[slot] {
            Slot::Registered {
                with_component: with_component @ false,
                ..
            } => *with_component = true,
            _ => {
                let error = CodecError::bad_parameter("buffer is already queued");
                return Err(BufferRejected::new(error, header));
            }
        }

        if self.index == PortIndex::Input && header.mark.is_none() {
            header.mark = inner.pending_marks.pop_front();
        }
        inner.queue.push_back(header);
        self.semaphore.post();
        Ok(())
    }

    /// Take one permit and pop the queue head into the data buffer
    ///
    /// Called by the worker with the pipeline lock held and the data buffer
    /// empty. The permit and the header leave together under the port lock,
    /// so a flush that ran since the worker woke leaves nothing to take.
    /// Returns whether a buffer was loaded.
    pub(crate) fn load_next(&self) -> bool {
        let next = {
            let mut inner = self.inner();
            if !self.semaphore.try_wait() {
                return false;
            }
            inner.queue.pop_front()
        };
        let Some(header) = next else {
            return false;
        };
        let mut data = lock(&self.data);
        debug_assert!(data.is_empty());
        data.load(header);
        true
    }

    /// Take every buffer the port holds, queued or in flight
    ///
    /// Leaves the queue empty and the semaphore at zero.
    pub(crate) fn drain(&self) -> Vec<BufferHeader> {
        let mut drained = Vec::new();
        {
            let mut inner = self.inner();
            drained.extend(inner.queue.drain(..));
            self.semaphore.reset();
        }
        if let Some(header) = lock(&self.data).take() {
            drained.insert(0, header);
        }
        drained
    }

    /// Record that `header` is leaving the component
    ///
    /// Returns the tunnel peer it should go to, if the port is tunneled.
    pub(crate) fn release(&self, header: &BufferHeader) -> Option<Arc<dyn TunnelPeer>> {
        let mut inner = self.inner();
        let id = header.id();
        if let Some(Slot::Registered {
            generation,
            with_component,
            ..
        }) = inner.slots.get_mut(id.slot)
        {
            if *generation == id.generation {
                *with_component = false;
            }
        }
        inner.tunnel.clone()
    }

    pub(crate) fn push_mark(&self, mark: Mark) {
        self.inner().pending_marks.push_back(mark);
    }

    pub(crate) fn set_flushing(&self, flushing: bool) {
        self.inner().being_flushed = flushing;
    }

    pub(crate) fn set_disabling(&self, disabling: bool) {
        self.inner().being_disabled = disabling;
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        let mut inner = self.inner();
        inner.enabled = enabled;
        inner.config.enabled = enabled;
    }

    pub(crate) fn is_being_disabled(&self) -> bool {
        self.inner().being_disabled
    }

    pub(crate) fn mark_invalid(&self) {
        let mut inner = self.inner();
        inner.invalid = true;
        inner.pending_marks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hwcodec_core::sync::WaitTimeout;
    use proptest::prelude::*;
    use std::time::Duration;

    fn port(count: usize) -> Port {
        Port::new(
            PortIndex::Input,
            PortConfig {
                buffer_count: count,
                min_buffer_count: 1,
                buffer_size: 16,
                enabled: true,
            },
        )
    }

    #[test]
    fn test_populated_after_last_registration() {
        let port = port(2);
        assert!(port.unloaded.is_set());

        let a = port.register(BufferOrigin::Host, vec![0; 16]).unwrap();
        assert!(!port.is_populated());
        assert!(!port.unloaded.is_set());

        let b = port.register(BufferOrigin::Component, vec![0; 32]).unwrap();
        assert!(port.is_populated());
        assert!(port.loaded.is_set());
        assert_ne!(a.id().slot, b.id().slot);

        let err = port.register(BufferOrigin::Host, vec![0; 16]).unwrap_err();
        assert!(matches!(err, CodecError::BadParameter(_)));
    }

    #[test]
    fn test_undersized_buffer_rejected() {
        let port = port(1);
        let err = port.register(BufferOrigin::Host, vec![0; 8]).unwrap_err();
        assert!(matches!(err, CodecError::BadParameter(_)));
        assert_eq!(port.status().registered, 0);
    }

    #[test]
    fn test_unregister_signals_unloaded() {
        let port = port(1);
        let header = port.register(BufferOrigin::Host, vec![0; 16]).unwrap();
        port.unregister(&header).unwrap();
        assert!(port.unloaded.is_set());
        assert!(!port.loaded.is_set());
        assert!(!port.is_populated());

        // Second free of the same header is stale
        assert!(port.unregister(&header).is_err());
    }

    #[test]
    fn test_stale_generation_rejected() {
        let port = port(1);
        let old = port.register(BufferOrigin::Host, vec![0; 16]).unwrap();
        port.unregister(&old).unwrap();
        let new = port.register(BufferOrigin::Host, vec![0; 16]).unwrap();
        assert_eq!(old.id().slot, new.id().slot);

        let rejected = port.enqueue(old).unwrap_err();
        assert!(matches!(rejected.error, CodecError::BadParameter(_)));
        assert_eq!(rejected.buffer.id().slot, new.id().slot);
        assert_eq!(port.semaphore.count(), 0);
    }

    #[test]
    fn test_enqueue_posts_semaphore_in_order() {
        let port = port(3);
        for n in 0..3 {
            let mut header = port.register(BufferOrigin::Host, vec![0; 16]).unwrap();
            header.timestamp = n;
            port.enqueue(header).unwrap();
        }
        assert_eq!(port.semaphore.count(), 3);
        assert_eq!(port.status().queued, 3);

        for n in 0..3 {
            assert!(port.load_next());
            let header = lock(&port.data).take().unwrap();
            assert_eq!(header.timestamp, n);
        }
    }

    #[test]
    fn test_double_enqueue_rejected() {
        let port = port(1);
        let header = port.register(BufferOrigin::Host, vec![0; 16]).unwrap();
        let copy = header.clone();
        port.enqueue(header).unwrap();
        assert!(port.enqueue(copy).is_err());
        assert_eq!(port.semaphore.count(), 1);
    }

    #[test]
    fn test_queued_buffer_cannot_be_freed() {
        let port = port(1);
        let header = port.register(BufferOrigin::Host, vec![0; 16]).unwrap();
        let copy = header.clone();
        port.enqueue(header).unwrap();
        assert!(port.unregister(&copy).is_err());

        let drained = port.drain();
        assert_eq!(drained.len(), 1);
        port.release(&drained[0]);
        port.unregister(&drained[0]).unwrap();
    }

    #[test]
    fn test_enqueue_rejected_while_flushing() {
        let port = port(1);
        let header = port.register(BufferOrigin::Host, vec![0; 16]).unwrap();
        port.set_flushing(true);
        assert!(port.enqueue(header).is_err());
        assert_eq!(port.status().queued, 0);
    }

    #[test]
    fn test_drain_resets_semaphore_and_data_buffer() {
        let port = port(2);
        let a = port.register(BufferOrigin::Host, vec![0; 16]).unwrap();
        let b = port.register(BufferOrigin::Host, vec![0; 16]).unwrap();
        port.enqueue(a).unwrap();
        port.enqueue(b).unwrap();

        assert!(port.load_next());
        lock(&port.data).consume(4);

        let drained = port.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(port.semaphore.count(), 0);
        assert!(lock(&port.data).is_empty());

        // Idempotent
        assert!(port.drain().is_empty());
    }

    #[test]
    fn test_pending_mark_applied_to_next_input() {
        let port = port(1);
        let mark = Mark {
            target: hwcodec_core::ComponentId(3),
            data: 42,
        };
        port.push_mark(mark);
        let header = port.register(BufferOrigin::Host, vec![0; 16]).unwrap();
        port.enqueue(header).unwrap();
        assert!(port.load_next());
        let header = lock(&port.data).take().unwrap();
        assert_eq!(header.mark, Some(mark));
    }

    #[test]
    fn test_flush_between_wake_and_load_keeps_count_in_step() {
        let port = port(2);
        let a = port.register(BufferOrigin::Host, vec![0; 16]).unwrap();
        let mut b = port.register(BufferOrigin::Host, vec![0; 16]).unwrap();
        b.timestamp = 7;
        port.enqueue(a).unwrap();

        // Worker wakes for `a`
        assert!(!port
            .semaphore
            .wait_available(WaitTimeout::After(Duration::from_millis(10)))
            .is_timeout());

        // Flush takes `a` back before the worker loads it
        let drained = port.drain();
        assert_eq!(drained.len(), 1);
        for header in &drained {
            port.release(header);
        }

        // Host queues `b`, then the worker loads
        port.enqueue(b).unwrap();
        assert!(port.load_next());
        assert_eq!(lock(&port.data).header().map(|h| h.timestamp), Some(7));
        assert_eq!(port.semaphore.count(), 0);
        assert_eq!(port.status().queued, 0);
    }

    #[test]
    fn test_load_after_flush_with_nothing_queued() {
        let port = port(1);
        let a = port.register(BufferOrigin::Host, vec![0; 16]).unwrap();
        port.enqueue(a).unwrap();
        port.drain();

        assert!(!port.load_next());
        assert!(lock(&port.data).is_empty());
        assert_eq!(port.semaphore.count(), 0);
    }

    #[test]
    fn test_set_definition_requires_no_buffers() {
        let port = port(2);
        let mut definition = port.definition();
        definition.buffer_count = 4;
        port.set_definition(&definition).unwrap();
        assert_eq!(port.definition().buffer_count, 4);

        definition.buffer_count = 0;
        assert!(port.set_definition(&definition).is_err());

        let _header = port.register(BufferOrigin::Host, vec![0; 16]).unwrap();
        definition.buffer_count = 2;
        assert!(port.set_definition(&definition).is_err());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Use,
        Allocate,
        Free(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Use),
            Just(Op::Allocate),
            (0usize..8).prop_map(Op::Free),
        ]
    }

    proptest! {
        #[test]
        fn prop_slot_accounting(count in 1usize..6, ops in prop::collection::vec(op(), 0..40)) {
            let port = port(count);
            let mut held: Vec<BufferHeader> = Vec::new();

            for op in ops {
                match op {
                    Op::Use | Op::Allocate => {
                        let origin = if matches!(op, Op::Use) {
                            BufferOrigin::Host
                        } else {
                            BufferOrigin::Component
                        };
                        match port.register(origin, vec![0; 16]) {
                            Ok(header) => held.push(header),
                            Err(_) => prop_assert_eq!(held.len(), count),
                        }
                    }
                    Op::Free(n) => {
                        if !held.is_empty() {
                            let header = held.remove(n % held.len());
                            prop_assert!(port.unregister(&header).is_ok());
                        }
                    }
                }

                let status = port.status();
                prop_assert!(status.registered <= count);
                prop_assert_eq!(status.registered, held.len());
                prop_assert_eq!(status.populated, held.len() == count);
                prop_assert_eq!(port.loaded.is_set(), held.len() == count);
                prop_assert_eq!(port.unloaded.is_set(), held.is_empty());
            }
        }
    }
}
