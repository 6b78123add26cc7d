//! State transitions, flush and port enable/disable
//!
//! Everything here runs on the dispatch thread, one command at a time. Each
//! operation leaves the component in a stable state (transient `None`) when
//! it returns, whether it succeeded or not.

use crate::component::Shared;
use crate::pipeline;
use hwcodec_core::sync::lock;
use hwcodec_core::{
    is_legal_transition, CodecError, ComponentEvent, ComponentState, PortIndex, Result,
    TransientState,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};

impl Shared {
    /// Move to `target`, performing whatever the transition requires
    pub(crate) fn transition(self: &Arc<Self>, target: ComponentState) -> Result<()> {
        let current = self.state();
        if current == ComponentState::Invalid {
            return Err(CodecError::InvalidState);
        }
        if current == target {
            return Err(CodecError::SameState(target));
        }
        if target == ComponentState::Invalid {
            self.enter_invalid();
            return Err(CodecError::InvalidState);
        }
        if !is_legal_transition(current, target) {
            warn!(component = %self.name, from = ?current, to = ?target, "illegal transition");
            return Err(CodecError::IncorrectStateTransition {
                from: current,
                to: target,
            });
        }

        debug!(component = %self.name, from = ?current, to = ?target, "transition");
        use ComponentState::*;
        match (current, target) {
            (Loaded | WaitForResources, Idle) => self.loaded_to_idle(current),
            (Loaded, WaitForResources) => {
                self.resources.enter_waiting(self.resource_request());
                self.settle(WaitForResources);
                Ok(())
            }
            (WaitForResources, Loaded) => {
                self.resources.leave_waiting(self.id, self.class);
                self.settle(Loaded);
                Ok(())
            }
            (Idle, Loaded) => self.idle_to_loaded(),
            (Idle | Pause, Executing) => {
                self.to_executing(current);
                Ok(())
            }
            (Executing | Pause, Idle) => {
                self.to_idle();
                Ok(())
            }
            (Idle | Executing, Pause) => {
                self.settle(Pause);
                Ok(())
            }
            _ => Err(CodecError::IncorrectStateTransition {
                from: current,
                to: target,
            }),
        }
    }

    /// Acquire a hardware slot, wait for buffers, open the codec, start the worker
    pub(crate) fn loaded_to_idle(self: &Arc<Self>, from: ComponentState) -> Result<()> {
        self.set_transient(TransientState::LoadedToIdle);

        let request = self.resource_request();
        if let Err(error) = self.resources.acquire(request.clone()) {
            if from == ComponentState::WaitForResources {
                self.resources.enter_waiting(request);
            }
            self.set_transient(TransientState::None);
            return Err(error);
        }

        for port in &self.ports {
            if !port.needs_rendezvous() {
                continue;
            }
            let timed_out = port.loaded.wait(self.timeout).is_timeout();
            if self.shutting_down() {
                debug!(component = %self.name, "admission interrupted by shutdown");
                self.abandon_idle(from);
                return Err(CodecError::InvalidState);
            }
            if timed_out {
                warn!(component = %self.name, port = ?port.index(), "buffers not supplied in time");
                self.abandon_idle(from);
                return Err(CodecError::timeout(format!(
                    "{:?} port buffers were not supplied",
                    port.index()
                )));
            }
        }

        {
            let mut pipeline = lock(&self.pipeline);
            if let Err(error) = pipeline.backend.open(self.class) {
                drop(pipeline);
                error!(component = %self.name, %error, "codec open failed");
                self.abandon_idle(from);
                return Err(error);
            }
            pipeline.codec_open = true;
            pipeline.reset();
        }

        if let Err(error) = self.start_worker() {
            error!(component = %self.name, %error, "worker start failed");
            self.close_codec();
            self.abandon_idle(from);
            return Err(error);
        }

        self.settle(ComponentState::Idle);
        Ok(())
    }

    /// Roll back a failed admission: give the slot back and stay in `from`
    fn abandon_idle(&self, from: ComponentState) {
        self.resources.release(self.id, self.class);
        if from == ComponentState::WaitForResources {
            self.resources.enter_waiting(self.resource_request());
        }
        self.set_transient(TransientState::None);
    }

    /// Stop the worker, return buffers, close the codec and release the slot
    ///
    /// Ends in `Loaded` even when the unload rendezvous times out; the
    /// timeout is still reported.
    pub(crate) fn idle_to_loaded(&self) -> Result<()> {
        self.set_transient(TransientState::IdleToLoaded);
        self.stop_worker();
        self.return_all_buffers();
        self.close_codec();
        self.resources.release(self.id, self.class);

        let mut result = Ok(());
        for port in &self.ports {
            if !port.needs_rendezvous() {
                continue;
            }
            let timed_out = port.unloaded.wait(self.timeout).is_timeout();
            if self.shutting_down() {
                debug!(component = %self.name, "unload rendezvous interrupted by shutdown");
                break;
            }
            if timed_out {
                warn!(component = %self.name, port = ?port.index(), "buffers not freed in time");
                result = Err(CodecError::timeout(format!(
                    "{:?} port buffers were not freed",
                    port.index()
                )));
            }
        }

        self.settle(ComponentState::Loaded);
        result
    }

    fn to_executing(&self, from: ComponentState) {
        if from == ComponentState::Idle {
            self.set_transient(TransientState::IdleToExecuting);
            for port in &self.ports {
                if let Some(peer) = port.tunnel() {
                    peer.start_supply();
                }
            }
        }
        self.settle(ComponentState::Executing);
    }

    /// Leave `Executing`/`Pause` with every buffer back with its owner
    pub(crate) fn to_idle(&self) {
        self.set_transient(TransientState::ExecutingToIdle);
        self.flush(&PortIndex::BOTH);
        self.settle(ComponentState::Idle);
    }

    /// One-way trapdoor; the caller reports `InvalidState`
    pub(crate) fn enter_invalid(&self) {
        self.release_everything();
        for port in &self.ports {
            port.mark_invalid();
        }
        self.settle(ComponentState::Invalid);
        warn!(component = %self.name, "component is invalid");
    }

    /// Final cleanup before the component goes away
    pub(crate) fn teardown(&self) {
        self.release_everything();
        if self.state() != ComponentState::Invalid {
            self.settle(ComponentState::Loaded);
        }
        info!(component = %self.name, "component torn down");
    }

    fn release_everything(&self) {
        self.stop_worker();
        self.return_all_buffers();
        self.close_codec();
        self.resources.release(self.id, self.class);
        self.resources.leave_waiting(self.id, self.class);
    }

    /// The resource manager gave our slot to a more important component
    ///
    /// Ignored when the notice is stale and the slot is held again.
    pub(crate) fn preempted(self: &Arc<Self>) {
        let current = self.state();
        if !current.has_resources() || self.resources.is_active(self.id, self.class) {
            return;
        }
        warn!(component = %self.name, state = ?current, "hardware slot preempted");
        self.notify(ComponentEvent::Error(CodecError::ResourcesPreempted));

        if matches!(current, ComponentState::Executing | ComponentState::Pause) {
            self.to_idle();
        }
        match self.idle_to_loaded() {
            Ok(()) => self.notify(ComponentEvent::CommandComplete(
                hwcodec_core::Command::StateSet(ComponentState::Loaded),
            )),
            Err(error) => self.notify(ComponentEvent::Error(error)),
        }
    }

    /// A slot freed up while parked in `WaitForResources`
    pub(crate) fn resources_available(self: &Arc<Self>) {
        if self.state() != ComponentState::WaitForResources {
            return;
        }
        debug!(component = %self.name, "retrying admission");
        match self.loaded_to_idle(ComponentState::WaitForResources) {
            Ok(()) => self.notify(ComponentEvent::CommandComplete(
                hwcodec_core::Command::StateSet(ComponentState::Idle),
            )),
            Err(error) => self.notify(ComponentEvent::Error(error)),
        }
    }

    /// Return every buffer queued or in flight on `ports` with zero length
    ///
    /// Resets frame assembly, end-of-stream and timestamp state for the
    /// input, and pending output for the output. No buffer drained here
    /// reaches the codec afterwards.
    pub(crate) fn flush(&self, ports: &[PortIndex]) {
        for &index in ports {
            self.port(index).set_flushing(true);
        }
        self.refresh_gate();

        let mut returned = Vec::new();
        {
            let mut pipeline = lock(&self.pipeline);
            for &index in ports {
                for mut header in self.port(index).drain() {
                    header.filled_len = 0;
                    returned.push(Self::returned(index, header));
                }
                match index {
                    PortIndex::Input => pipeline.reset_input(),
                    PortIndex::Output => pipeline.reset_output(),
                }
            }
        }
        let count = returned.len();
        self.deliver(returned);

        for &index in ports {
            self.port(index).set_flushing(false);
        }
        self.refresh_gate();
        debug!(component = %self.name, ?ports, returned = count, "flush complete");
    }

    /// Flush, wait for the host to free the port's buffers, then disable it
    pub(crate) fn disable_port(&self, index: PortIndex) -> Result<()> {
        let port = self.port(index);
        if !port.is_enabled() {
            port.set_disabling(false);
            return Ok(());
        }
        port.set_disabling(true);
        self.refresh_gate();

        if self.state().has_resources() {
            self.flush(&[index]);
            if !port.is_tunneled() {
                let timed_out = port.unloaded.wait(self.timeout).is_timeout();
                if timed_out || self.shutting_down() {
                    port.set_disabling(false);
                    self.refresh_gate();
                    return Err(if timed_out {
                        CodecError::timeout(format!("{index:?} port buffers were not freed"))
                    } else {
                        CodecError::InvalidState
                    });
                }
            }
        }

        port.set_enabled(false);
        port.set_disabling(false);
        self.refresh_gate();
        info!(component = %self.name, port = ?index, "port disabled");
        Ok(())
    }

    /// Enable a port and wait for the host to supply its buffers
    pub(crate) fn enable_port(&self, index: PortIndex) -> Result<()> {
        let port = self.port(index);
        port.set_enabled(true);

        if self.state().has_resources() && port.needs_rendezvous() {
            let timed_out = port.loaded.wait(self.timeout).is_timeout();
            if timed_out || self.shutting_down() {
                port.set_enabled(false);
                self.refresh_gate();
                return Err(if timed_out {
                    CodecError::timeout(format!("{index:?} port buffers were not supplied"))
                } else {
                    CodecError::InvalidState
                });
            }
        }

        self.refresh_gate();
        info!(component = %self.name, port = ?index, "port enabled");
        Ok(())
    }

    fn start_worker(self: &Arc<Self>) -> Result<()> {
        self.exit.store(false, Ordering::Release);
        for port in &self.ports {
            port.semaphore.reset();
        }
        self.refresh_gate();

        let shared = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(format!("{}-worker", self.name))
            .spawn(move || pipeline::run(shared))
            .map_err(|e| CodecError::Undefined(format!("failed to spawn worker thread: {e}")))?;
        *lock(&self.worker) = Some(handle);
        Ok(())
    }

    /// Set the exit flag, wake the worker wherever it waits, and join it
    fn stop_worker(&self) {
        let Some(handle) = lock(&self.worker).take() else {
            return;
        };
        self.exit.store(true, Ordering::Release);
        for port in &self.ports {
            port.semaphore.post();
        }
        self.pause.set();

        if handle.join().is_err() {
            error!(component = %self.name, "worker thread panicked");
        }
        debug!(component = %self.name, "worker stopped");
    }

    /// Hand back everything the ports hold; the worker must be stopped
    fn return_all_buffers(&self) {
        let mut returned = Vec::new();
        {
            let mut pipeline = lock(&self.pipeline);
            for port in &self.ports {
                for mut header in port.drain() {
                    header.filled_len = 0;
                    returned.push(Self::returned(port.index(), header));
                }
            }
            pipeline.reset();
        }
        if !returned.is_empty() {
            debug!(component = %self.name, count = returned.len(), "returning buffers");
        }
        self.deliver(returned);
    }

    fn close_codec(&self) {
        let mut pipeline = lock(&self.pipeline);
        if pipeline.codec_open {
            pipeline.backend.close();
            pipeline.codec_open = false;
            debug!(component = %self.name, "codec closed");
        }
    }
}
