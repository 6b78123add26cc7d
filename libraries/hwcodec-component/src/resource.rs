//! Hardware codec admission control
//!
//! One [`ResourceManager`] is built at process start and shared by every
//! component. It keeps, per codec class, an *active* list (components holding
//! a hardware slot) and a *waiting* list (components parked in
//! `WaitForResources`). Membership is exclusive.
//!
//! Preemption and wake-up are delivered through [`ResourceClient`] after the
//! registry lock is released, so a client may call straight back into the
//! manager.

use hwcodec_core::sync::lock;
use hwcodec_core::{CodecClass, CodecError, ComponentId, ResourceLimits, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Handle through which the manager talks to a component
#[cfg_attr(test, mockall::automock)]
pub trait ResourceClient: Send + Sync {
    /// The component lost its slot and must drop to `Loaded`
    fn preempt(&self);

    /// A slot was freed; the parked component should retry admission
    fn resources_available(&self);
}

/// Admission request
#[derive(Clone)]
pub struct ResourceRequest {
    pub id: ComponentId,
    pub class: CodecClass,
    pub priority: u32,
    pub client: Arc<dyn ResourceClient>,
}

struct Entry {
    id: ComponentId,
    priority: u32,
    client: Arc<dyn ResourceClient>,
    /// Admission sequence number, for eviction tie-breaks
    admitted: u64,
}

struct Pool {
    max: usize,
    active: Vec<Entry>,
    waiting: VecDeque<Entry>,
}

impl Pool {
    fn new(max: usize) -> Self {
        Self {
            max,
            active: Vec::new(),
            waiting: VecDeque::new(),
        }
    }

    /// Lowest-priority active entry strictly below `priority`; oldest wins ties
    fn victim_below(&self, priority: u32) -> Option<usize> {
        self.active
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.priority < priority)
            .min_by_key(|(_, entry)| (entry.priority, entry.admitted))
            .map(|(index, _)| index)
    }
}

struct Registry {
    decode: Pool,
    encode: Pool,
    next_id: u32,
    admissions: u64,
}

impl Registry {
    fn pool(&mut self, class: CodecClass) -> &mut Pool {
        match class {
            CodecClass::Decode => &mut self.decode,
            CodecClass::Encode => &mut self.encode,
        }
    }
}

/// Process-wide registry of hardware codec slots
pub struct ResourceManager {
    inner: Mutex<Registry>,
}

impl ResourceManager {
    /// Create with the given pool sizes
    pub fn new(limits: ResourceLimits) -> Self {
        info!(
            max_decoders = limits.max_decoders,
            max_encoders = limits.max_encoders,
            "resource manager ready"
        );
        Self {
            inner: Mutex::new(Registry {
                decode: Pool::new(limits.max_decoders),
                encode: Pool::new(limits.max_encoders),
                next_id: 1,
                admissions: 0,
            }),
        }
    }

    /// Issue an identity for a new component
    pub fn register(&self) -> ComponentId {
        let mut registry = lock(&self.inner);
        let id = ComponentId(registry.next_id);
        registry.next_id += 1;
        id
    }

    /// Grant a hardware slot, evicting a less important holder if the pool is full
    ///
    /// Eviction is asynchronous. The slot moves to the requester at once and
    /// the victim learns of it through a preempt message to its dispatcher,
    /// so until the victim has closed its codec the hardware can briefly run
    /// one instance more than the limit.
    pub fn acquire(&self, request: ResourceRequest) -> Result<()> {
        let victim = {
            let mut registry = lock(&self.inner);
            registry.admissions += 1;
            let admitted = registry.admissions;
            let pool = registry.pool(request.class);

            if pool.active.iter().any(|entry| entry.id == request.id) {
                return Ok(());
            }

            let victim = if pool.active.len() < pool.max {
                None
            } else {
                match pool.victim_below(request.priority) {
                    Some(index) => Some(pool.active.remove(index)),
                    None => {
                        warn!(
                            component = %request.id,
                            class = ?request.class,
                            priority = request.priority,
                            "no hardware slot and no lower-priority holder"
                        );
                        return Err(CodecError::InsufficientResources);
                    }
                }
            };

            pool.waiting.retain(|entry| entry.id != request.id);
            pool.active.push(Entry {
                id: request.id,
                priority: request.priority,
                client: request.client,
                admitted,
            });
            victim
        };

        match victim {
            Some(victim) => {
                info!(
                    component = %request.id,
                    evicted = %victim.id,
                    evicted_priority = victim.priority,
                    "hardware slot preempted"
                );
                victim.client.preempt();
            }
            None => {
                debug!(component = %request.id, class = ?request.class, "hardware slot granted");
            }
        }
        Ok(())
    }

    /// Give a slot back and wake the first parked component, if any
    ///
    /// A no-op for components that do not hold a slot (for instance after
    /// being evicted).
    pub fn release(&self, id: ComponentId, class: CodecClass) {
        let woken = {
            let mut registry = lock(&self.inner);
            let pool = registry.pool(class);
            let Some(index) = pool.active.iter().position(|entry| entry.id == id) else {
                return;
            };
            pool.active.remove(index);
            pool.waiting.pop_front()
        };

        debug!(component = %id, class = ?class, "hardware slot released");
        if let Some(entry) = woken {
            debug!(component = %entry.id, "waking parked component");
            entry.client.resources_available();
        }
    }

    /// Park a component until a slot frees up
    pub fn enter_waiting(&self, request: ResourceRequest) {
        let mut registry = lock(&self.inner);
        let pool = registry.pool(request.class);
        if pool.active.iter().any(|entry| entry.id == request.id)
            || pool.waiting.iter().any(|entry| entry.id == request.id)
        {
            return;
        }
        pool.waiting.push_back(Entry {
            id: request.id,
            priority: request.priority,
            client: request.client,
            admitted: 0,
        });
    }

    /// Remove a component from the waiting list
    pub fn leave_waiting(&self, id: ComponentId, class: CodecClass) {
        lock(&self.inner)
            .pool(class)
            .waiting
            .retain(|entry| entry.id != id);
    }

    /// Number of slots in use
    pub fn active_count(&self, class: CodecClass) -> usize {
        lock(&self.inner).pool(class).active.len()
    }

    /// Number of parked components
    pub fn waiting_count(&self, class: CodecClass) -> usize {
        lock(&self.inner).pool(class).waiting.len()
    }

    /// Whether `id` holds a slot
    pub fn is_active(&self, id: ComponentId, class: CodecClass) -> bool {
        lock(&self.inner)
            .pool(class)
            .active
            .iter()
            .any(|entry| entry.id == id)
    }
}

impl Default for ResourceManager {
    fn default() -> Self {
        Self::new(ResourceLimits::default())
    }
}
