//! Shared helpers for component integration tests
#![allow(dead_code)]

use hwcodec_component::{Component, ResourceManager};
use hwcodec_core::{
    BufferFlags, BufferHeader, ChannelHost, CodecBackend, CodecClass, CodecError, CodecInput,
    Command, ComponentConfig, ComponentEvent, ComponentState, ConfigValue, FrameBoundary,
    HostMessage, HostReceiver, PortConfig, PortIndex, ProcessResult, Result,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Upper bound on any single wait in these tests
pub const WAIT: Duration = Duration::from_secs(2);

/// First payload byte that makes the scripted codec fail
pub const ERROR_BYTE: u8 = 0xEE;

/// Payloads the codec was called with, in call order
pub type ProcessLog = Arc<Mutex<Vec<Vec<u8>>>>;

/// Behaviour of [`ScriptedBackend`]
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// `open` fails with `CodecOpen`
    pub fail_open: bool,

    /// Number of leading calls answered with `NotReady`
    pub not_ready_first: usize,

    /// Cut the input into fixed-size units instead of one unit per buffer
    pub unit_size: Option<usize>,

    /// Output is the input repeated this many times (at least once)
    pub output_repeat: usize,

    /// Units starting with this byte report changed port settings
    pub settings_change_on: Option<u8>,
}

/// Codec stand-in echoing its input
pub struct ScriptedBackend {
    script: Script,
    log: ProcessLog,
    settings: HashMap<String, ConfigValue>,
}

impl ScriptedBackend {
    pub fn new(script: Script) -> (Self, ProcessLog) {
        let log = ProcessLog::default();
        let backend = Self {
            script,
            log: log.clone(),
            settings: HashMap::new(),
        };
        (backend, log)
    }
}

impl CodecBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn open(&mut self, _class: CodecClass) -> Result<()> {
        if self.script.fail_open {
            return Err(CodecError::CodecOpen("device busy".into()));
        }
        Ok(())
    }

    fn close(&mut self) {}

    fn set_config(&mut self, key: &str, value: ConfigValue) -> Result<()> {
        self.settings.insert(key.to_string(), value);
        Ok(())
    }

    fn get_config(&self, key: &str) -> Result<ConfigValue> {
        self.settings
            .get(key)
            .cloned()
            .ok_or_else(|| CodecError::bad_parameter(format!("unknown key {key}")))
    }

    fn check_frame(&self, pending: &[u8], incoming: &[u8]) -> FrameBoundary {
        match self.script.unit_size {
            Some(size) => {
                let needed = size.saturating_sub(pending.len());
                if incoming.len() >= needed {
                    FrameBoundary::EndsAt(needed)
                } else {
                    FrameBoundary::Continue
                }
            }
            None => FrameBoundary::EndsAt(incoming.len()),
        }
    }

    fn process(&mut self, input: &CodecInput<'_>, output: &mut Vec<u8>) -> Result<ProcessResult> {
        self.log.lock().unwrap().push(input.data.to_vec());

        if input.data.first() == Some(&ERROR_BYTE) {
            return Err(CodecError::hardware("corrupt unit"));
        }
        if self.script.settings_change_on.is_some()
            && input.data.first() == self.script.settings_change_on.as_ref()
        {
            return Ok(ProcessResult::PortSettingsChanged);
        }
        if self.script.not_ready_first > 0 {
            self.script.not_ready_first -= 1;
            return Ok(ProcessResult::NotReady);
        }

        for _ in 0..self.script.output_repeat.max(1) {
            output.extend_from_slice(input.data);
        }
        Ok(ProcessResult::Produced {
            tag: None,
            flags: BufferFlags::empty(),
        })
    }
}

/// Config with 64-byte buffers and a bounded rendezvous
pub fn config(name: &str, class: CodecClass, inputs: usize, outputs: usize) -> ComponentConfig {
    let port = |count| PortConfig {
        buffer_count: count,
        min_buffer_count: 1,
        buffer_size: 64,
        enabled: true,
    };
    let mut config = ComponentConfig::new(name, class);
    config.input = port(inputs);
    config.output = port(outputs);
    config.transition_timeout_ms = Some(WAIT.as_millis() as u64);
    config
}

/// A component plus the receiving end of its callbacks
pub struct Harness {
    pub component: Component,
    rx: HostReceiver,
    backlog: VecDeque<HostMessage>,
}

impl Harness {
    pub fn new(
        config: ComponentConfig,
        backend: ScriptedBackend,
        resources: Arc<ResourceManager>,
    ) -> Self {
        let (host, rx) = ChannelHost::new();
        let component =
            Component::new(config, Box::new(backend), Arc::new(host), resources).unwrap();
        Self {
            component,
            rx,
            backlog: VecDeque::new(),
        }
    }

    /// Wait for the first message matching `pred`, keeping the others for later
    pub fn wait_message<F>(&mut self, what: &str, pred: F) -> HostMessage
    where
        F: Fn(&HostMessage) -> bool,
    {
        if let Some(pos) = self.backlog.iter().position(|m| pred(m)) {
            if let Some(message) = self.backlog.remove(pos) {
                return message;
            }
        }
        let mut skipped = Vec::new();
        let found = self.rx.wait_for(WAIT, &mut skipped, |m| pred(m));
        self.backlog.extend(skipped);
        found.unwrap_or_else(|| panic!("timed out waiting for {what}; received {:?}", self.backlog))
    }

    pub fn expect_complete(&mut self, command: Command) {
        self.wait_message(&format!("{command:?} completion"), |m| {
            matches!(m, HostMessage::Event(ComponentEvent::CommandComplete(c)) if *c == command)
        });
    }

    pub fn expect_event(&mut self, event: ComponentEvent) {
        let wanted = HostMessage::Event(event);
        self.wait_message(&format!("{wanted:?}"), |m| *m == wanted);
    }

    pub fn expect_error(&mut self) -> CodecError {
        match self.wait_message("error event", |m| {
            matches!(m, HostMessage::Event(ComponentEvent::Error(_)))
        }) {
            HostMessage::Event(ComponentEvent::Error(error)) => error,
            other => panic!("unexpected {other:?}"),
        }
    }

    pub fn next_fill(&mut self) -> BufferHeader {
        match self.wait_message("FillBufferDone", |m| matches!(m, HostMessage::FillDone(_))) {
            HostMessage::FillDone(header) => header,
            other => panic!("unexpected {other:?}"),
        }
    }

    pub fn next_empty(&mut self) -> BufferHeader {
        match self.wait_message("EmptyBufferDone", |m| matches!(m, HostMessage::EmptyDone(_))) {
            HostMessage::EmptyDone(header) => header,
            other => panic!("unexpected {other:?}"),
        }
    }

    /// Everything received and not yet consumed
    pub fn drain(&mut self) -> Vec<HostMessage> {
        let mut all: Vec<_> = self.backlog.drain(..).collect();
        all.extend(self.rx.drain());
        all
    }

    /// Let the component run for `delay`, then drain
    pub fn settle(&mut self, delay: Duration) -> Vec<HostMessage> {
        thread::sleep(delay);
        self.drain()
    }

    /// Allocate every buffer the port asks for
    pub fn allocate(&self, port: PortIndex) -> Vec<BufferHeader> {
        let definition = self.component.port_definition(port);
        (0..definition.buffer_count)
            .map(|_| {
                self.component
                    .allocate_buffer(port, definition.buffer_size)
                    .unwrap()
            })
            .collect()
    }

    pub fn set_state(&mut self, state: ComponentState) {
        self.component
            .send_command(Command::StateSet(state))
            .unwrap();
        self.expect_complete(Command::StateSet(state));
    }

    /// Loaded to Idle, supplying every configured buffer
    pub fn to_idle(&mut self) -> (Vec<BufferHeader>, Vec<BufferHeader>) {
        self.component
            .send_command(Command::StateSet(ComponentState::Idle))
            .unwrap();
        let inputs = self.allocate(PortIndex::Input);
        let outputs = self.allocate(PortIndex::Output);
        self.expect_complete(Command::StateSet(ComponentState::Idle));
        (inputs, outputs)
    }

    /// Idle to Loaded, freeing `buffers`
    pub fn to_loaded(&mut self, buffers: Vec<BufferHeader>) {
        self.component
            .send_command(Command::StateSet(ComponentState::Loaded))
            .unwrap();
        for buffer in buffers {
            self.component.free_buffer(buffer).unwrap();
        }
        self.expect_complete(Command::StateSet(ComponentState::Loaded));
    }

    /// Deinit and return every callback received
    pub fn deinit(self) -> Vec<HostMessage> {
        let Harness {
            component,
            rx,
            backlog,
        } = self;
        component.deinit().unwrap();
        let mut all: Vec<_> = backlog.into_iter().collect();
        all.extend(rx.drain());
        all
    }
}

/// Fill an input buffer with `payload` as one whole frame
pub fn frame(mut header: BufferHeader, payload: &[u8], timestamp: i64) -> BufferHeader {
    header.write_payload(payload);
    header.flags = BufferFlags::END_OF_FRAME;
    header.timestamp = timestamp;
    header
}
