//! Component handle and the state shared by its threads
//!
//! A [`Component`] is owned by the host. Internally everything lives in a
//! reference-counted `Shared` used by three kinds of threads:
//! - host threads calling the public methods (cheap checks, then enqueue)
//! - the dispatch thread executing commands one at a time
//! - the worker thread driving the codec while `Executing`

use crate::dispatcher::{self, DispatchHandle, Message};
use crate::error::BufferRejected;
use crate::pipeline::Pipeline;
use crate::port::{Port, PortDefinition, PortStatus};
use crate::resource::{ResourceManager, ResourceRequest};
use hwcodec_core::sync::{lock, Signal, WaitTimeout};
use hwcodec_core::{
    BufferHeader, BufferOrigin, CodecBackend, CodecClass, CodecError, Command, ComponentConfig,
    ComponentEvent, ComponentId, ComponentState, ConfigValue, HostCallbacks, HostMessage,
    PortIndex, Result, TransientState, TunnelPeer, Version,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

/// Current and transient state, always read and written together
#[derive(Debug, Clone, Copy)]
pub(crate) struct StateCell {
    pub(crate) current: ComponentState,
    pub(crate) transient: TransientState,
}

pub(crate) struct Shared {
    pub(crate) id: ComponentId,
    pub(crate) name: String,
    pub(crate) class: CodecClass,
    pub(crate) priority: u32,

    /// Bound on buffer rendezvous waits
    pub(crate) timeout: WaitTimeout,

    state: Mutex<StateCell>,
    pub(crate) ports: [Port; 2],

    /// Set while the worker may run an iteration (or must wake up to exit)
    pub(crate) pause: Signal,
    pub(crate) exit: AtomicBool,

    /// Set once the handle is going away; buffer rendezvous waits give up
    shutdown: AtomicBool,

    /// Codec backend and frame assembly state; held for a whole iteration
    pub(crate) pipeline: Mutex<Pipeline>,

    pub(crate) host: Arc<dyn HostCallbacks>,
    pub(crate) resources: Arc<ResourceManager>,
    pub(crate) client: Arc<DispatchHandle>,
    pub(crate) worker: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, StateCell> {
        lock(&self.state)
    }

    pub(crate) fn state(&self) -> ComponentState {
        self.lock_state().current
    }

    pub(crate) fn port(&self, index: PortIndex) -> &Port {
        &self.ports[index.as_usize()]
    }

    pub(crate) fn set_transient(&self, transient: TransientState) {
        let mut state = self.lock_state();
        state.transient = transient;
        self.refresh_gate_locked(&state);
    }

    /// Finish a transition: record the new state and clear the transient
    pub(crate) fn settle(&self, target: ComponentState) {
        let from = {
            let mut state = self.lock_state();
            let from = state.current;
            state.current = target;
            state.transient = TransientState::None;
            self.refresh_gate_locked(&state);
            from
        };
        info!(component = %self.name, ?from, to = ?target, "state changed");
    }

    /// Whether the worker may run an iteration
    pub(crate) fn may_process(&self) -> bool {
        let state = self.lock_state();
        self.may_process_locked(&state)
    }

    fn may_process_locked(&self, state: &StateCell) -> bool {
        state.current == ComponentState::Executing
            && state.transient == TransientState::None
            && self.ports.iter().all(Port::is_ready)
    }

    pub(crate) fn shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Wake any transition blocked on a buffer rendezvous so it can unwind
    fn interrupt_waits(&self) {
        self.shutdown.store(true, Ordering::Release);
        for port in &self.ports {
            port.loaded.set();
            port.unloaded.set();
        }
    }

    /// Re-evaluate the pause signal after a state or port flag change
    pub(crate) fn refresh_gate(&self) {
        let state = self.lock_state();
        self.refresh_gate_locked(&state);
    }

    fn refresh_gate_locked(&self, state: &StateCell) {
        if self.exit.load(Ordering::Acquire) || self.may_process_locked(state) {
            self.pause.set();
        } else {
            self.pause.reset();
        }
    }

    pub(crate) fn resource_request(&self) -> ResourceRequest {
        ResourceRequest {
            id: self.id,
            class: self.class,
            priority: self.priority,
            client: self.client.clone(),
        }
    }

    pub(crate) fn notify(&self, event: ComponentEvent) {
        self.host.event(event);
    }

    /// Message returning `header` to whoever owns `index`'s buffers
    pub(crate) fn returned(index: PortIndex, header: BufferHeader) -> HostMessage {
        match index {
            PortIndex::Input => HostMessage::EmptyDone(header),
            PortIndex::Output => HostMessage::FillDone(header),
        }
    }

    /// Hand events and buffers to the host, or to a tunnel peer
    ///
    /// Must be called without holding any component lock.
    pub(crate) fn deliver<I>(&self, messages: I)
    where
        I: IntoIterator<Item = HostMessage>,
    {
        for message in messages {
            match message {
                HostMessage::Event(event) => self.host.event(event),
                HostMessage::EmptyDone(header) => {
                    match self.port(PortIndex::Input).release(&header) {
                        Some(peer) => peer.return_buffer(header),
                        None => self.host.empty_buffer_done(header),
                    }
                }
                HostMessage::FillDone(header) => {
                    match self.port(PortIndex::Output).release(&header) {
                        Some(peer) => peer.return_buffer(header),
                        None => self.host.fill_buffer_done(header),
                    }
                }
            }
        }
    }
}

/// One codec instance
///
/// Dropping the handle tears the component down: the worker is stopped,
/// every buffer still held is returned and the hardware slot is released.
pub struct Component {
    shared: Arc<Shared>,
    dispatcher: Option<JoinHandle<()>>,
}

impl Component {
    /// Create a component in `Loaded` and start its dispatch thread
    pub fn new(
        config: ComponentConfig,
        backend: Box<dyn CodecBackend>,
        host: Arc<dyn HostCallbacks>,
        resources: Arc<ResourceManager>,
    ) -> Result<Self> {
        config.validate()?;

        let id = resources.register();
        let (client, rx) = DispatchHandle::channel();
        let shared = Arc::new(Shared {
            id,
            name: config.name.clone(),
            class: config.class,
            priority: config.priority,
            timeout: WaitTimeout::from_millis(config.transition_timeout_ms),
            state: Mutex::new(StateCell {
                current: ComponentState::Loaded,
                transient: TransientState::None,
            }),
            ports: [
                Port::new(PortIndex::Input, config.input),
                Port::new(PortIndex::Output, config.output),
            ],
            pause: Signal::new(false),
            exit: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            pipeline: Mutex::new(Pipeline::new(backend, config.work_buffer_size)),
            host,
            resources,
            client: Arc::new(client),
            worker: Mutex::new(None),
        });

        let dispatcher = thread::Builder::new()
            .name(format!("{}-dispatch", config.name))
            .spawn({
                let shared = Arc::clone(&shared);
                move || dispatcher::run(shared, rx)
            })
            .map_err(|e| CodecError::Undefined(format!("failed to spawn dispatch thread: {e}")))?;

        info!(
            component = %config.name,
            id = %id,
            class = ?config.class,
            priority = config.priority,
            "component created"
        );

        Ok(Self {
            shared,
            dispatcher: Some(dispatcher),
        })
    }

    /// Identity issued by the resource manager
    pub fn id(&self) -> ComponentId {
        self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> ComponentState {
        self.shared.state()
    }

    /// Transition currently in progress, if any
    pub fn transient_state(&self) -> TransientState {
        self.shared.lock_state().transient
    }

    /// Validate a command and queue it for the dispatch thread
    ///
    /// Completion or failure is reported through the event callback.
    pub fn send_command(&self, command: Command) -> Result<()> {
        {
            let mut state = self.shared.lock_state();
            let current = state.current;

            if current == ComponentState::Invalid && command != Command::ComponentDeinit {
                return Err(CodecError::InvalidState);
            }

            match command {
                Command::StateSet(target) => match (current, target) {
                    (
                        ComponentState::Loaded | ComponentState::WaitForResources,
                        ComponentState::Idle,
                    ) if state.transient == TransientState::None =>
                    {
                        state.transient = TransientState::LoadedToIdle;
                    }
                    (ComponentState::Idle, ComponentState::Loaded)
                        if state.transient == TransientState::None =>
                    {
                        state.transient = TransientState::IdleToLoaded;
                    }
                    _ => {}
                },
                Command::Flush(_) => {
                    if !current.has_resources() {
                        return Err(CodecError::IncorrectStateOperation(current));
                    }
                }
                Command::PortDisable(selector) => {
                    for index in selector.ports() {
                        let port = self.shared.port(index);
                        if port.is_enabled() {
                            port.set_disabling(true);
                        }
                    }
                }
                Command::PortEnable(selector) => {
                    for index in selector.ports() {
                        self.shared.port(index).set_enabled(true);
                    }
                }
                Command::MarkBuffer(index, _) => {
                    if index != PortIndex::Input {
                        return Err(CodecError::bad_port(index));
                    }
                    if !current.has_resources() {
                        return Err(CodecError::IncorrectStateOperation(current));
                    }
                }
                Command::ComponentDeinit => {}
            }
        }
        self.shared.refresh_gate();

        debug!(component = %self.shared.name, ?command, "command queued");
        if self.shared.client.send(Message::Command(command)) {
            Ok(())
        } else {
            Err(CodecError::InvalidState)
        }
    }

    /// Register host-supplied memory as a buffer of `index`
    pub fn use_buffer(&self, index: PortIndex, data: Vec<u8>) -> Result<BufferHeader> {
        self.register(index, BufferOrigin::Host, data)
    }

    /// Allocate a buffer of `size` bytes for `index`
    pub fn allocate_buffer(&self, index: PortIndex, size: usize) -> Result<BufferHeader> {
        self.register(index, BufferOrigin::Component, vec![0; size])
    }

    fn register(
        &self,
        index: PortIndex,
        origin: BufferOrigin,
        data: Vec<u8>,
    ) -> Result<BufferHeader> {
        let header = {
            let state = self.shared.lock_state();
            let allowed = state.transient == TransientState::LoadedToIdle
                || state.current == ComponentState::WaitForResources
                || (state.current.has_resources() && state.transient == TransientState::None);
            let port = self.shared.port(index);
            if !allowed || !port.accepts_registration() {
                return Err(CodecError::IncorrectStateOperation(state.current));
            }
            port.register(origin, data)?
        };
        self.shared.refresh_gate();

        debug!(
            component = %self.shared.name,
            port = ?index,
            slot = header.id().slot,
            ?origin,
            "buffer registered"
        );
        Ok(header)
    }

    /// Unregister a buffer the host owns, returning its memory
    pub fn free_buffer(
        &self,
        header: BufferHeader,
    ) -> std::result::Result<Vec<u8>, BufferRejected> {
        let index = header.port();
        {
            let state = self.shared.lock_state();
            let port = self.shared.port(index);
            let allowed = port.is_being_disabled()
                || !port.is_enabled()
                || state.transient == TransientState::IdleToLoaded
                || matches!(
                    state.current,
                    ComponentState::Loaded
                        | ComponentState::WaitForResources
                        | ComponentState::Invalid
                );
            if !allowed {
                let error = CodecError::IncorrectStateOperation(state.current);
                return Err(BufferRejected::new(error, header));
            }
            if let Err(error) = port.unregister(&header) {
                return Err(BufferRejected::new(error, header));
            }
        }
        self.shared.refresh_gate();

        debug!(
            component = %self.shared.name,
            port = ?index,
            slot = header.id().slot,
            "buffer freed"
        );
        Ok(header.into_data())
    }

    /// Hand a filled input buffer to the component
    pub fn empty_this_buffer(
        &self,
        header: BufferHeader,
    ) -> std::result::Result<(), BufferRejected> {
        self.queue_buffer(PortIndex::Input, header)
    }

    /// Hand an empty output buffer to the component
    pub fn fill_this_buffer(
        &self,
        mut header: BufferHeader,
    ) -> std::result::Result<(), BufferRejected> {
        header.clear();
        self.queue_buffer(PortIndex::Output, header)
    }

    fn queue_buffer(
        &self,
        index: PortIndex,
        header: BufferHeader,
    ) -> std::result::Result<(), BufferRejected> {
        if header.port() != index {
            return Err(BufferRejected::new(CodecError::bad_port(header.port()), header));
        }

        let state = self.shared.lock_state();
        let error = match (state.current, state.transient) {
            (ComponentState::Invalid, _) => Some(CodecError::InvalidState),
            (current, TransientState::IdleToLoaded) => {
                Some(CodecError::IncorrectStateOperation(current))
            }
            (current, _) if !current.has_resources() => {
                Some(CodecError::IncorrectStateOperation(current))
            }
            _ => None,
        };
        if let Some(error) = error {
            return Err(BufferRejected::new(error, header));
        }
        self.shared.port(index).enqueue(header)
    }

    /// Buffer requirements and status of a port
    pub fn port_definition(&self, index: PortIndex) -> PortDefinition {
        self.shared.port(index).definition()
    }

    /// Change buffer requirements of a port
    ///
    /// Only while the component is `Loaded` or the port is disabled.
    pub fn set_port_definition(&self, definition: PortDefinition) -> Result<()> {
        if !Version::CURRENT.is_compatible(definition.version) {
            return Err(CodecError::VersionMismatch {
                expected: Version::CURRENT.to_string(),
                actual: definition.version.to_string(),
            });
        }

        let state = self.shared.lock_state();
        let port = self.shared.port(definition.index);
        if state.current != ComponentState::Loaded && port.is_enabled() {
            return Err(CodecError::IncorrectStateOperation(state.current));
        }
        port.set_definition(&definition)?;

        debug!(
            component = %self.shared.name,
            port = ?definition.index,
            buffer_count = definition.buffer_count,
            buffer_size = definition.buffer_size,
            "port definition updated"
        );
        Ok(())
    }

    /// Read a codec setting from the backend
    pub fn get_config(&self, key: &str) -> Result<ConfigValue> {
        lock(&self.shared.pipeline).backend.get_config(key)
    }

    /// Forward a codec setting to the backend
    pub fn set_config(&self, key: &str, value: ConfigValue) -> Result<()> {
        lock(&self.shared.pipeline).backend.set_config(key, value)
    }

    /// Bind `index` to a tunnel peer, or unbind it with `None`
    pub fn set_tunnel(&self, index: PortIndex, peer: Option<Arc<dyn TunnelPeer>>) -> Result<()> {
        let state = self.shared.lock_state();
        if state.current != ComponentState::Loaded {
            return Err(CodecError::IncorrectStateOperation(state.current));
        }
        self.shared.port(index).set_tunnel(peer);
        Ok(())
    }

    /// Flags and counters of a port
    pub fn port_status(&self, index: PortIndex) -> PortStatus {
        self.shared.port(index).status()
    }

    /// Tear down and wait for the dispatch thread to finish
    pub fn deinit(mut self) -> Result<()> {
        self.shared.interrupt_waits();
        let sent = self.shared.client.send(Message::Command(Command::ComponentDeinit));
        self.join_dispatcher();
        if sent {
            Ok(())
        } else {
            Err(CodecError::InvalidState)
        }
    }

    fn join_dispatcher(&mut self) {
        if let Some(handle) = self.dispatcher.take() {
            if handle.join().is_err() {
                error!(component = %self.shared.name, "dispatch thread panicked");
            }
        }
    }
}

impl Drop for Component {
    fn drop(&mut self) {
        if self.dispatcher.is_some() {
            self.shared.interrupt_waits();
            self.shared.client.send(Message::Shutdown);
            self.join_dispatcher();
        }
    }
}

impl std::fmt::Debug for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Component")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .field("state", &self.shared.state())
            .finish()
    }
}
