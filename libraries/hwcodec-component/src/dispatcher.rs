//! Command dispatch thread
//!
//! Commands are validated on the caller's thread and then executed here, one
//! at a time, in submission order. Resource manager notices arrive on the
//! same queue so they are serialized with host commands.

use crate::component::Shared;
use crate::resource::ResourceClient;
use crossbeam_channel::{unbounded, Receiver, Sender};
use hwcodec_core::{Command, ComponentEvent, PortSelector, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// Work item for the dispatch thread
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Message {
    /// Host command, already validated
    Command(Command),

    /// Hardware slot was taken by another component
    Preempt,

    /// A hardware slot freed up while waiting
    ResourcesAvailable,

    /// Component handle dropped
    Shutdown,
}

/// Sending side of a component's dispatch queue
///
/// Also the component's face towards the resource manager.
pub(crate) struct DispatchHandle {
    tx: Sender<Message>,
}

impl DispatchHandle {
    pub(crate) fn channel() -> (Self, Receiver<Message>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }

    /// Queue a message; `false` once the dispatch thread has exited
    pub(crate) fn send(&self, message: Message) -> bool {
        self.tx.send(message).is_ok()
    }
}

impl ResourceClient for DispatchHandle {
    fn preempt(&self) {
        self.send(Message::Preempt);
    }

    fn resources_available(&self) {
        self.send(Message::ResourcesAvailable);
    }
}

/// Dispatch loop; returns after deinit or shutdown
pub(crate) fn run(shared: Arc<Shared>, rx: Receiver<Message>) {
    debug!(component = %shared.name, "dispatch thread started");

    for message in rx.iter() {
        match message {
            Message::Command(Command::ComponentDeinit) => {
                shared.teardown();
                shared.notify(ComponentEvent::CommandComplete(Command::ComponentDeinit));
                break;
            }
            Message::Command(command) => execute(&shared, command),
            Message::Preempt => shared.preempted(),
            Message::ResourcesAvailable => shared.resources_available(),
            Message::Shutdown => {
                shared.teardown();
                break;
            }
        }
    }

    info!(component = %shared.name, "dispatch thread exiting");
}

fn execute(shared: &Arc<Shared>, command: Command) {
    debug!(component = %shared.name, ?command, "executing command");
    match command {
        Command::StateSet(target) => report(shared, command, shared.transition(target)),
        Command::Flush(selector) => {
            let current = shared.state();
            if !current.has_resources() {
                report(
                    shared,
                    command,
                    Err(hwcodec_core::CodecError::IncorrectStateOperation(current)),
                );
                return;
            }
            for index in selector.ports() {
                shared.flush(&[index]);
                report(shared, Command::Flush(PortSelector::Port(index)), Ok(()));
            }
        }
        Command::PortDisable(selector) => {
            for index in selector.ports() {
                let result = shared.disable_port(index);
                report(shared, Command::PortDisable(PortSelector::Port(index)), result);
            }
        }
        Command::PortEnable(selector) => {
            for index in selector.ports() {
                let result = shared.enable_port(index);
                report(shared, Command::PortEnable(PortSelector::Port(index)), result);
            }
        }
        Command::MarkBuffer(index, mark) => {
            shared.port(index).push_mark(mark);
            report(shared, command, Ok(()));
        }
        // Handled by the loop
        Command::ComponentDeinit => {}
    }
}

/// Completion event on success, error event instead on failure
fn report(shared: &Shared, command: Command, result: Result<()>) {
    match result {
        Ok(()) => shared.notify(ComponentEvent::CommandComplete(command)),
        Err(error) => {
            debug!(component = %shared.name, kind = ?command.kind(), %error, "command failed");
            shared.notify(ComponentEvent::Error(error));
        }
    }
}
