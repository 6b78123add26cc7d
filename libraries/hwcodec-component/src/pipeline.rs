//! Buffer processing worker
//!
//! One worker thread per component, alive from `Idle` until the component
//! drops back to `Loaded`. Each iteration:
//! 1. blocks on the pause signal unless the component is `Executing` with
//!    both ports settled
//! 2. makes sure an output buffer is in flight, waiting on the output
//!    semaphore if needed
//! 3. drains pending output, or assembles one logical unit from the input
//!    port (waiting on the input semaphore when the current buffer runs dry)
//! 4. runs the codec on that unit, and at end-of-stream drains every unit
//!    the codec still holds
//! 5. copies the result into the output buffer and returns it
//!
//! The pipeline lock is held for a whole iteration but never while waiting
//! on a semaphore or the pause signal. Host callbacks are collected during
//! the iteration and delivered after the lock is released.

use crate::component::Shared;
use crate::frame::{PendingOutput, ProcessData, TimestampTable, UNIT_FLAGS};
use hwcodec_core::sync::{lock, WaitTimeout};
use hwcodec_core::{
    BufferFlags, CodecBackend, CodecClass, CodecError, CodecInput, ComponentEvent, FrameBoundary,
    HostMessage, Mark, PortIndex, ProcessResult,
};
use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

/// Result of one pipeline iteration
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum IterationOutcome {
    /// Output was handed to the output port
    Produced,

    /// The codec consumed input without emitting output yet
    NeedMoreInput,

    /// The codec rejected the unit; already reported to the host
    Error(CodecError),
}

/// What the worker should do after a step
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Step {
    /// Wait for the host to queue a buffer on this port
    Fetch(PortIndex),

    Ran(IterationOutcome),
}

/// Codec backend plus everything the worker carries between iterations
pub(crate) struct Pipeline {
    pub(crate) backend: Box<dyn CodecBackend>,
    pub(crate) codec_open: bool,
    unit: ProcessData,
    timestamps: TimestampTable,
    pending: VecDeque<PendingOutput>,

    /// Marks for other components, attached to the next output buffer
    forward_marks: VecDeque<Mark>,

    /// End-of-stream already reported for the current stream end
    eos_signalled: bool,
    scratch: Vec<u8>,
}

impl Pipeline {
    pub(crate) fn new(backend: Box<dyn CodecBackend>, work_buffer_size: usize) -> Self {
        Self {
            backend,
            codec_open: false,
            unit: ProcessData::new(work_buffer_size),
            timestamps: TimestampTable::new(),
            pending: VecDeque::new(),
            forward_marks: VecDeque::new(),
            eos_signalled: false,
            scratch: Vec::new(),
        }
    }

    /// Forget everything but the backend
    pub(crate) fn reset(&mut self) {
        self.reset_input();
        self.reset_output();
    }

    pub(crate) fn reset_input(&mut self) {
        self.unit.reset();
        self.timestamps.clear();
        self.eos_signalled = false;
    }

    pub(crate) fn reset_output(&mut self) {
        self.pending.clear();
        self.forward_marks.clear();
    }

    /// Run one iteration, collecting host messages in `out`
    pub(crate) fn step(&mut self, shared: &Shared, out: &mut Vec<HostMessage>) -> Step {
        if lock(&shared.port(PortIndex::Output).data).is_empty() {
            return Step::Fetch(PortIndex::Output);
        }

        if !self.pending.is_empty() {
            self.deliver(shared, out);
            return Step::Ran(IterationOutcome::Produced);
        }

        if !self.assemble(shared, out) {
            return Step::Fetch(PortIndex::Input);
        }

        let outcome = self.run_codec(shared, out);
        self.deliver(shared, out);
        Step::Ran(outcome)
    }

    /// Accumulate input until a logical unit is complete
    ///
    /// Returns `false` when the input port has no buffer in flight. Input
    /// buffers are returned to the host as soon as they are fully consumed.
    /// A buffer flagged end-of-frame or codec-config closes the unit with all
    /// of its bytes; end-of-stream closes it once the buffer runs dry.
    fn assemble(&mut self, shared: &Shared, out: &mut Vec<HostMessage>) -> bool {
        let mut data = lock(&shared.port(PortIndex::Input).data);
        loop {
            let Some(header) = data.header() else {
                return false;
            };
            let flags = header.flags;
            if self.unit.timestamp.is_none() {
                self.unit.timestamp = Some(header.timestamp);
            }

            let available = data.remaining().len();
            let whole = flags.intersects(BufferFlags::END_OF_FRAME | BufferFlags::CODEC_CONFIG);
            let (mut take, mut boundary) = if whole {
                (available, true)
            } else {
                match self.backend.check_frame(self.unit.bytes(), data.remaining()) {
                    FrameBoundary::EndsAt(end) if end > 0 || !self.unit.is_empty() => {
                        (end.min(available), true)
                    }
                    _ => (available, false),
                }
            };

            if take > self.unit.room() {
                warn!(
                    component = %shared.name,
                    assembled = self.unit.bytes().len(),
                    incoming = take,
                    "frame exceeds work buffer, cutting it short"
                );
                take = self.unit.room();
                boundary = true;
            }

            self.unit.extend(&data.remaining()[..take]);
            data.consume(take);

            if data.is_exhausted() {
                if let Some(mut header) = data.take() {
                    self.unit.flags |= header.flags & UNIT_FLAGS;
                    if header.mark.is_some() {
                        self.unit.mark = header.mark.take();
                    }
                    boundary |= header.flags.contains(BufferFlags::EOS);
                    header.filled_len = 0;
                    out.push(HostMessage::EmptyDone(header));
                }
            }

            if boundary {
                if self.unit.is_empty()
                    && !self.unit.flags.contains(BufferFlags::EOS)
                    && self.unit.mark.is_none()
                {
                    self.unit.reset();
                    continue;
                }
                return true;
            }
        }
    }

    /// Submit the assembled unit to the codec and stage any output
    fn run_codec(&mut self, shared: &Shared, out: &mut Vec<HostMessage>) -> IterationOutcome {
        let flags = self.unit.flags;
        let timestamp = self.unit.timestamp.unwrap_or_default();
        let eos = flags.contains(BufferFlags::EOS);
        if !eos {
            self.eos_signalled = false;
        }

        if let Some(mark) = self.unit.mark.take() {
            if mark.target == shared.id {
                out.push(HostMessage::Event(ComponentEvent::Mark { data: mark.data }));
            } else {
                self.forward_marks.push_back(mark);
            }
        }

        let outcome = if self.unit.is_empty() {
            IterationOutcome::NeedMoreInput
        } else {
            let tag = self.timestamps.insert(timestamp, flags);
            self.scratch.clear();
            let input = CodecInput {
                data: self.unit.bytes(),
                flags,
                timestamp,
                tag,
            };

            match self.backend.process(&input, &mut self.scratch) {
                Ok(ProcessResult::Produced {
                    tag: produced,
                    flags: extra,
                }) => {
                    let (stamp, unit_flags) = self
                        .timestamps
                        .take(produced.unwrap_or(tag))
                        .unwrap_or((timestamp, flags));
                    let out_flags = (unit_flags | extra).difference(BufferFlags::EOS);
                    let data = std::mem::take(&mut self.scratch);
                    trace!(
                        component = %shared.name,
                        len = data.len(),
                        timestamp = stamp,
                        "codec produced output"
                    );
                    self.pending.push_back(PendingOutput::new(data, out_flags, stamp));
                    IterationOutcome::Produced
                }
                Ok(ProcessResult::NotReady) => IterationOutcome::NeedMoreInput,
                Ok(ProcessResult::PortSettingsChanged) => {
                    self.timestamps.take(tag);
                    debug!(component = %shared.name, "output port settings changed");
                    out.push(HostMessage::Event(ComponentEvent::PortSettingsChanged(
                        PortIndex::Output,
                    )));
                    IterationOutcome::NeedMoreInput
                }
                Err(error) => {
                    self.timestamps.take(tag);
                    error!(component = %shared.name, %error, "codec processing failed");
                    out.push(HostMessage::Event(ComponentEvent::Error(error.clone())));
                    IterationOutcome::Error(error)
                }
            }
        };

        if eos {
            self.drain_codec(shared, timestamp, out);
            match self.pending.back_mut() {
                Some(last) => last.flags |= BufferFlags::EOS,
                None => {
                    let empty = PendingOutput::new(Vec::new(), BufferFlags::EOS, timestamp);
                    self.pending.push_back(empty);
                }
            }
        }
        self.unit.reset();
        outcome
    }

    /// Stage every unit the codec still holds at end-of-stream
    fn drain_codec(&mut self, shared: &Shared, timestamp: i64, out: &mut Vec<HostMessage>) {
        loop {
            self.scratch.clear();
            match self.backend.drain(&mut self.scratch) {
                Ok(ProcessResult::Produced { tag, flags: extra }) => {
                    let (stamp, unit_flags) = tag
                        .and_then(|tag| self.timestamps.take(tag))
                        .unwrap_or((timestamp, BufferFlags::empty()));
                    let out_flags = (unit_flags | extra).difference(BufferFlags::EOS);
                    let data = std::mem::take(&mut self.scratch);
                    trace!(
                        component = %shared.name,
                        len = data.len(),
                        timestamp = stamp,
                        "codec drained output"
                    );
                    self.pending.push_back(PendingOutput::new(data, out_flags, stamp));
                }
                Ok(ProcessResult::NotReady) => break,
                Ok(ProcessResult::PortSettingsChanged) => {
                    warn!(component = %shared.name, "format change while draining, stopping");
                    break;
                }
                Err(error) => {
                    error!(component = %shared.name, %error, "codec drain failed");
                    out.push(HostMessage::Event(ComponentEvent::Error(error)));
                    break;
                }
            }
        }
    }

    /// Copy pending output into the output buffer in flight and return it
    fn deliver(&mut self, shared: &Shared, out: &mut Vec<HostMessage>) {
        let Some(pending) = self.pending.front_mut() else {
            return;
        };
        let mut data = lock(&shared.port(PortIndex::Output).data);
        let Some(header) = data.header_mut() else {
            return;
        };

        let produced = pending.remaining().len();
        if shared.class == CodecClass::Decode && produced > header.alloc_len() {
            warn!(
                component = %shared.name,
                produced,
                capacity = header.alloc_len(),
                "decoded frame larger than output buffer, dropped"
            );
            if !pending.flags.contains(BufferFlags::EOS) {
                self.pending.pop_front();
                return;
            }
            pending.offset = pending.data.len();
        }

        let written = header.write_payload(pending.remaining());
        pending.offset += written;
        let finished = pending.remaining().is_empty();

        header.timestamp = pending.timestamp;
        header.flags = if finished {
            pending.flags
        } else {
            pending.flags.difference(BufferFlags::EOS)
        };
        header.mark = self.forward_marks.pop_front();
        let eos = finished && pending.flags.contains(BufferFlags::EOS);

        if let Some(header) = data.take() {
            out.push(HostMessage::FillDone(header));
        }
        if finished {
            self.pending.pop_front();
        }
        if eos && !self.eos_signalled {
            self.eos_signalled = true;
            out.push(HostMessage::Event(ComponentEvent::BufferFlag {
                port: PortIndex::Output,
                flags: BufferFlags::EOS,
            }));
        }
    }
}

/// Worker thread body
pub(crate) fn run(shared: Arc<Shared>) {
    debug!(component = %shared.name, "worker started");
    let mut outbox = Vec::new();

    while !shared.exit.load(Ordering::Acquire) {
        if !shared.may_process() {
            shared.pause.wait(WaitTimeout::Infinite);
            continue;
        }

        let step = {
            let mut pipeline = lock(&shared.pipeline);
            if !shared.may_process() {
                continue;
            }
            pipeline.step(&shared, &mut outbox)
        };
        shared.deliver(outbox.drain(..));

        match step {
            Step::Fetch(index) => fetch(&shared, index),
            Step::Ran(IterationOutcome::Produced) => {}
            Step::Ran(IterationOutcome::NeedMoreInput) => {
                trace!(component = %shared.name, "codec needs more input");
            }
            Step::Ran(IterationOutcome::Error(error)) => {
                debug!(component = %shared.name, %error, "continuing after codec error");
            }
        }
    }

    debug!(component = %shared.name, "worker exiting");
}

/// Wait for a buffer on `index` and move it into the port's data buffer
fn fetch(shared: &Shared, index: PortIndex) {
    let port = shared.port(index);
    port.semaphore.wait_available(WaitTimeout::Infinite);
    if shared.exit.load(Ordering::Acquire) {
        return;
    }
    let _pipeline = lock(&shared.pipeline);
    if !port.load_next() {
        trace!(component = %shared.name, port = ?index, "woken with nothing to load");
    }
}
