//! Host side of the simulation
//!
//! Every configured component gets its own host thread that walks it through
//! the full lifecycle: admission (parking in `WaitForResources` when the pool
//! is busy), streaming a synthetic bitstream, and teardown. A component that
//! loses its slot to a more important one gives back its buffers, waits to be
//! re-admitted and streams again from the start.

use crate::config::{SimComponent, SimConfig, StreamSettings};
use crate::error::{Result, SimError};
use hwcodec_backends::{synthetic, FormatBackend};
use hwcodec_component::{Component, ResourceManager};
use hwcodec_core::{
    BufferFlags, BufferHeader, ChannelHost, CodecError, Command, ComponentEvent, ComponentState,
    HostMessage, HostReceiver, PortIndex,
};
use serde::Serialize;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// What one component did during the run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ComponentReport {
    pub name: String,

    /// Output buffers that carried data
    pub frames: usize,
    pub bytes: usize,

    /// Times the component parked in `WaitForResources`
    pub waits: usize,
    pub preemptions: usize,

    /// Error events raised by the data path
    pub errors: usize,
}

/// Cut every picture into `pieces` host buffers
///
/// Cuts fall inside the filler payload so no start code is ever split.
pub fn stream_chunks(component: &SimComponent, stream: &StreamSettings) -> Vec<Vec<u8>> {
    let mut chunks = Vec::new();
    for picture in synthetic::pictures(component.format, stream.pictures, stream.payload_len) {
        let header_len = picture.len() - stream.payload_len;
        let step = stream.payload_len / stream.pieces;
        let mut start = 0;
        for piece in 1..stream.pieces {
            let end = header_len + piece * step;
            chunks.push(picture[start..end].to_vec());
            start = end;
        }
        chunks.push(picture[start..].to_vec());
    }
    chunks
}

/// Runs every configured component against one shared resource manager
pub struct Simulation {
    config: SimConfig,
    resources: Arc<ResourceManager>,
}

impl Simulation {
    pub fn new(config: SimConfig) -> Result<Self> {
        config.validate()?;
        let resources = Arc::new(ResourceManager::new(config.pool));
        Ok(Self { config, resources })
    }

    pub fn resources(&self) -> &Arc<ResourceManager> {
        &self.resources
    }

    /// Run all components to completion, one host thread each
    pub fn run(&self) -> Result<Vec<ComponentReport>> {
        info!(
            components = self.config.components.len(),
            pictures = self.config.stream.pictures,
            "simulation starting"
        );
        let started = Instant::now();

        let results: Vec<Result<ComponentReport>> = thread::scope(|scope| {
            let handles: Vec<_> = self
                .config
                .components
                .iter()
                .map(|setup| {
                    let handle = scope.spawn(move || self.run_component(setup));
                    (setup.name.as_str(), handle)
                })
                .collect();
            handles
                .into_iter()
                .map(|(name, handle)| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(SimError::Panicked(name.to_string())))
                })
                .collect()
        });

        let reports = results.into_iter().collect::<Result<Vec<_>>>()?;
        info!(elapsed_ms = started.elapsed().as_millis() as u64, "simulation finished");
        Ok(reports)
    }

    fn run_component(&self, setup: &SimComponent) -> Result<ComponentReport> {
        if setup.start_delay_ms > 0 {
            thread::sleep(Duration::from_millis(setup.start_delay_ms));
        }
        let chunks = stream_chunks(setup, &self.config.stream);
        let mut host = Host::new(setup, &self.config, Arc::clone(&self.resources))?;
        loop {
            host.admit()?;
            match host.stream(&chunks)? {
                Outcome::Finished => break,
                Outcome::Preempted => host.recover()?,
            }
        }
        host.retire()?;
        host.finish()
    }
}

enum Outcome {
    Finished,
    Preempted,
}

/// One component plus the buffers its host currently owns
struct Host {
    name: String,
    component: Component,
    rx: HostReceiver,
    timeout: Duration,
    admission_timeout: Duration,
    buffer_count: usize,
    buffer_size: usize,
    inputs: Vec<BufferHeader>,
    outputs: Vec<BufferHeader>,
    registered: usize,
    report: ComponentReport,
}

impl Host {
    fn new(
        setup: &SimComponent,
        config: &SimConfig,
        resources: Arc<ResourceManager>,
    ) -> Result<Self> {
        let (callbacks, rx) = ChannelHost::new();
        let backend = FormatBackend::loopback(setup.format, setup.loopback.clone());
        let component = Component::new(
            setup.component_config(config.timeout_ms),
            Box::new(backend),
            Arc::new(callbacks),
            resources,
        )
        .map_err(|e| SimError::component(&setup.name, e))?;
        debug!(component = %setup.name, format = %setup.format, id = %component.id(), "host ready");

        Ok(Self {
            name: setup.name.clone(),
            component,
            rx,
            timeout: Duration::from_millis(config.timeout_ms),
            admission_timeout: Duration::from_millis(config.admission_timeout_ms),
            buffer_count: setup.buffer_count,
            buffer_size: setup.buffer_size,
            inputs: Vec::new(),
            outputs: Vec::new(),
            registered: 0,
            report: ComponentReport {
                name: setup.name.clone(),
                ..ComponentReport::default()
            },
        })
    }

    fn send(&self, command: Command) -> Result<()> {
        self.component
            .send_command(command)
            .map_err(|e| SimError::component(&self.name, e))
    }

    fn next_message(&self, timeout: Duration) -> Option<HostMessage> {
        self.rx.recv_timeout(timeout)
    }

    /// Keep returned buffers; log everything else
    fn absorb(&mut self, message: HostMessage) {
        match message {
            HostMessage::EmptyDone(header) => self.inputs.push(header),
            HostMessage::FillDone(header) => self.outputs.push(header),
            HostMessage::Event(event) => debug!(component = %self.name, ?event, "event"),
        }
    }

    /// Wait for `command` to complete or for the first error event
    ///
    /// `None` when nothing decisive arrived within `timeout`.
    fn poll_outcome(
        &mut self,
        command: Command,
        timeout: Duration,
    ) -> Option<std::result::Result<(), CodecError>> {
        let deadline = Instant::now() + timeout;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.next_message(left)? {
                HostMessage::Event(ComponentEvent::CommandComplete(done)) if done == command => {
                    return Some(Ok(()));
                }
                // A retried admission that crossed a wake-up
                HostMessage::Event(ComponentEvent::Error(CodecError::SameState(state))) => {
                    debug!(component = %self.name, ?state, "duplicate state request ignored");
                }
                HostMessage::Event(ComponentEvent::Error(error)) => return Some(Err(error)),
                other => self.absorb(other),
            }
        }
    }

    fn outcome(
        &mut self,
        command: Command,
        timeout: Duration,
    ) -> Result<std::result::Result<(), CodecError>> {
        self.poll_outcome(command, timeout)
            .ok_or_else(|| SimError::timeout(&self.name, format!("{command:?}")))
    }

    fn allocate_all(&mut self) -> Result<()> {
        for port in PortIndex::BOTH {
            for _ in 0..self.buffer_count {
                let header = self
                    .component
                    .allocate_buffer(port, self.buffer_size)
                    .map_err(|e| SimError::component(&self.name, e))?;
                self.registered += 1;
                match port {
                    PortIndex::Input => self.inputs.push(header),
                    PortIndex::Output => self.outputs.push(header),
                }
            }
        }
        Ok(())
    }

    fn free_all(&mut self) -> Result<()> {
        for header in self.inputs.drain(..).chain(self.outputs.drain(..)) {
            self.component
                .free_buffer(header)
                .map_err(|rejected| SimError::component(&self.name, rejected.into_parts().0))?;
            self.registered -= 1;
        }
        Ok(())
    }

    /// Collect returned buffers until the host owns every registered one
    fn wait_home(&mut self) -> Result<()> {
        while self.inputs.len() + self.outputs.len() < self.registered {
            let message = self
                .next_message(self.timeout)
                .ok_or_else(|| SimError::timeout(&self.name, "buffers to come back"))?;
            self.absorb(message);
        }
        Ok(())
    }

    /// Loaded to Idle, parking in WaitForResources while the pool is full
    fn admit(&mut self) -> Result<()> {
        let idle = Command::StateSet(ComponentState::Idle);
        self.send(idle)?;
        if let Err(error) = self.allocate_all() {
            debug!(component = %self.name, %error, "allocation raced a failed admission");
        }
        match self.outcome(idle, self.timeout)? {
            Ok(()) => {
                info!(component = %self.name, "admitted");
                return Ok(());
            }
            Err(CodecError::InsufficientResources) => {
                info!(component = %self.name, "pool busy, waiting for resources");
            }
            Err(error) => return Err(SimError::component(&self.name, error)),
        }

        self.free_all()?;
        let park = Command::StateSet(ComponentState::WaitForResources);
        self.send(park)?;
        if let Err(error) = self.outcome(park, self.timeout)? {
            return Err(SimError::component(&self.name, error));
        }
        self.report.waits += 1;
        self.allocate_all()?;

        let deadline = Instant::now() + self.admission_timeout;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Err(SimError::timeout(&self.name, "a hardware slot"));
            }
            match self.poll_outcome(idle, left.min(self.timeout)) {
                Some(Ok(())) => {
                    info!(component = %self.name, "admitted after waiting");
                    return Ok(());
                }
                // Lost the freed slot to another waiter; still parked
                Some(Err(CodecError::InsufficientResources)) => continue,
                Some(Err(error)) => return Err(SimError::component(&self.name, error)),
                // A slot freed before we parked wakes nobody; ask again
                None => {
                    debug!(component = %self.name, "still parked, retrying admission");
                    self.send(idle)?;
                }
            }
        }
    }

    /// Executing, then feed the stream until end-of-stream comes out
    fn stream(&mut self, chunks: &[Vec<u8>]) -> Result<Outcome> {
        let executing = Command::StateSet(ComponentState::Executing);
        self.send(executing)?;
        match self.outcome(executing, self.timeout)? {
            Ok(()) => {}
            Err(CodecError::ResourcesPreempted) => return Ok(Outcome::Preempted),
            Err(error) => return Err(SimError::component(&self.name, error)),
        }

        for output in std::mem::take(&mut self.outputs) {
            if let Err(rejected) = self.component.fill_this_buffer(output) {
                self.outputs.push(rejected.into_parts().1);
            }
        }

        let mut next = 0;
        loop {
            while next < chunks.len() {
                let Some(mut input) = self.inputs.pop() else {
                    break;
                };
                input.write_payload(&chunks[next]);
                input.timestamp = next as i64;
                input.flags = if next + 1 == chunks.len() {
                    BufferFlags::EOS
                } else {
                    BufferFlags::empty()
                };
                if let Err(rejected) = self.component.empty_this_buffer(input) {
                    self.inputs.push(rejected.into_parts().1);
                    break;
                }
                next += 1;
            }

            let message = self
                .next_message(self.timeout)
                .ok_or_else(|| SimError::timeout(&self.name, "stream progress"))?;
            match message {
                HostMessage::FillDone(header) => {
                    if header.filled_len > 0 {
                        self.report.frames += 1;
                        self.report.bytes += header.filled_len;
                    }
                    if header.flags.contains(BufferFlags::EOS) {
                        self.outputs.push(header);
                        info!(component = %self.name, frames = self.report.frames, "end of stream");
                        return Ok(Outcome::Finished);
                    }
                    if let Err(rejected) = self.component.fill_this_buffer(header) {
                        self.outputs.push(rejected.into_parts().1);
                    }
                }
                HostMessage::EmptyDone(header) => self.inputs.push(header),
                HostMessage::Event(ComponentEvent::Error(CodecError::ResourcesPreempted)) => {
                    return Ok(Outcome::Preempted);
                }
                HostMessage::Event(ComponentEvent::Error(error)) => {
                    self.report.errors += 1;
                    warn!(component = %self.name, %error, "data path error");
                }
                HostMessage::Event(event) => debug!(component = %self.name, ?event, "event"),
            }
        }
    }

    /// The component is heading back to Loaded on its own; hand it its buffers
    fn recover(&mut self) -> Result<()> {
        self.report.preemptions += 1;
        warn!(component = %self.name, "preempted, restarting stream after re-admission");
        self.wait_home()?;
        self.free_all()?;
        let loaded = Command::StateSet(ComponentState::Loaded);
        match self.outcome(loaded, self.timeout)? {
            Ok(()) => Ok(()),
            Err(error) => Err(SimError::component(&self.name, error)),
        }
    }

    /// Executing to Idle to Loaded with every buffer freed
    fn retire(&mut self) -> Result<()> {
        let idle = Command::StateSet(ComponentState::Idle);
        self.send(idle)?;
        match self.outcome(idle, self.timeout)? {
            Ok(()) => {}
            Err(CodecError::ResourcesPreempted) => return self.recover(),
            Err(error) => return Err(SimError::component(&self.name, error)),
        }

        let loaded = Command::StateSet(ComponentState::Loaded);
        self.send(loaded)?;
        self.wait_home()?;
        self.free_all()?;
        loop {
            match self.outcome(loaded, self.timeout)? {
                Ok(()) => return Ok(()),
                // Preempted in Idle: the component unloads itself and our
                // own request then finds it already Loaded
                Err(CodecError::ResourcesPreempted) => self.report.preemptions += 1,
                Err(error) => return Err(SimError::component(&self.name, error)),
            }
        }
    }

    fn finish(self) -> Result<ComponentReport> {
        let Host {
            name,
            component,
            report,
            ..
        } = self;
        component
            .deinit()
            .map_err(|e| SimError::component(&name, e))?;
        info!(
            component = %name,
            frames = report.frames,
            bytes = report.bytes,
            waits = report.waits,
            preemptions = report.preemptions,
            "component finished"
        );
        Ok(report)
    }
}
