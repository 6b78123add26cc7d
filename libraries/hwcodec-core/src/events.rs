//! Host-facing notifications
//!
//! Every return of buffer ownership to the host goes through exactly one call
//! of [`HostCallbacks::empty_buffer_done`] or [`HostCallbacks::fill_buffer_done`].
//! Everything else is a [`ComponentEvent`].

use crate::buffer::{BufferFlags, BufferHeader};
use crate::command::Command;
use crate::error::CodecError;
use crate::types::PortIndex;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

/// Event delivered to the host's event handler
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentEvent {
    /// A command finished successfully
    CommandComplete(Command),

    /// A command or the data path failed
    Error(CodecError),

    /// The output port needs to be reconfigured
    PortSettingsChanged(PortIndex),

    /// A buffer carrying notable flags (end-of-stream) left the port
    BufferFlag {
        /// Port the buffer left from
        port: PortIndex,
        /// Flags that triggered the event
        flags: BufferFlags,
    },

    /// A mark targeting this component was reached
    Mark {
        /// Host data stored in the mark
        data: u64,
    },
}

/// Callbacks registered by the host at component creation
///
/// Invoked from the dispatch and worker threads, never while a component lock
/// is held, so implementations may call back into the component.
pub trait HostCallbacks: Send + Sync {
    /// Command completion, error and notification events
    fn event(&self, event: ComponentEvent);

    /// An input buffer has been consumed and is owned by the host again
    fn empty_buffer_done(&self, buffer: BufferHeader);

    /// An output buffer has been filled and is owned by the host again
    fn fill_buffer_done(&self, buffer: BufferHeader);
}

/// Component on the other end of a tunneled port
pub trait TunnelPeer: Send + Sync {
    /// Hand a buffer back to the peer that supplied it
    fn return_buffer(&self, buffer: BufferHeader);

    /// The tunnel's consumer started executing; the supplier may start sending
    fn start_supply(&self) {}
}

/// Anything a component hands back to its host
#[derive(Debug, Clone, PartialEq)]
pub enum HostMessage {
    /// Event handler call
    Event(ComponentEvent),

    /// `EmptyBufferDone`
    EmptyDone(BufferHeader),

    /// `FillBufferDone`
    FillDone(BufferHeader),
}

/// [`HostCallbacks`] that forwards everything into a channel
///
/// Lets a host thread consume callbacks in order, with timeouts.
#[derive(Debug, Clone)]
pub struct ChannelHost {
    tx: Sender<HostMessage>,
}

impl ChannelHost {
    /// Create the callback sink and the receiving end
    pub fn new() -> (Self, HostReceiver) {
        let (tx, rx) = unbounded();
        (Self { tx }, HostReceiver { rx })
    }
}

impl HostCallbacks for ChannelHost {
    fn event(&self, event: ComponentEvent) {
        self.tx.send(HostMessage::Event(event)).ok();
    }

    fn empty_buffer_done(&self, buffer: BufferHeader) {
        self.tx.send(HostMessage::EmptyDone(buffer)).ok();
    }

    fn fill_buffer_done(&self, buffer: BufferHeader) {
        self.tx.send(HostMessage::FillDone(buffer)).ok();
    }
}

/// Receiving side of a [`ChannelHost`]
#[derive(Debug, Clone)]
pub struct HostReceiver {
    rx: Receiver<HostMessage>,
}

impl HostReceiver {
    /// Next message, waiting at most `timeout`
    pub fn recv_timeout(&self, timeout: Duration) -> Option<HostMessage> {
        match self.rx.recv_timeout(timeout) {
            Ok(message) => Some(message),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Next message if one is already waiting
    pub fn try_recv(&self) -> Option<HostMessage> {
        self.rx.try_recv().ok()
    }

    /// Wait for the first message matching `pred`, collecting the ones skipped
    ///
    /// Returns `None` when `timeout` elapses first. Skipped messages are
    /// appended to `skipped` so the caller does not lose buffers.
    pub fn wait_for<F>(
        &self,
        timeout: Duration,
        skipped: &mut Vec<HostMessage>,
        mut pred: F,
    ) -> Option<HostMessage>
    where
        F: FnMut(&HostMessage) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return None;
            }
            let message = self.recv_timeout(left)?;
            if pred(&message) {
                return Some(message);
            }
            skipped.push(message);
        }
    }

    /// Drain everything currently queued
    pub fn drain(&self) -> Vec<HostMessage> {
        self.rx.try_iter().collect()
    }
}
