use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use crossbeam_channel::{Receiver, Sender};
use indexmap::IndexMap;
use stage_core::{ActorId, ContextId, SchedulerConfig};
use tracing::info;

use crate::scheduler::broadcast::BroadcastHandler;
use crate::scheduler::context::ScriptContext;
use crate::scheduler::control::{self, ControlEvent};
use crate::scheduler::effects::EffectQueue;
use crate::scheduler::error::SchedulerError;
use crate::scheduler::metrics::SchedulerMetrics;
use crate::scheduler::pool::WorkerPool;
use crate::scheduler::surface::ActorSurface;
use crate::scheduler::types::{ContextKind, ContextState};

/// The script scheduler. Owns every scheduling table and is driven from the
/// thread that created it.
pub struct Scheduler {
    pub(super) config: SchedulerConfig,
    pub(super) running: bool,
    pub(super) control_thread: ThreadId,
    pub(super) broadcasts: Arc<dyn BroadcastHandler>,
    /// Registered actors and their action surfaces.
    pub(super) actors: IndexMap<ActorId, Box<dyn ActorSurface>>,
    /// Every registered context.
    pub(super) contexts: HashMap<ContextId, ScriptContext>,
    /// Registration order; When-contexts at the head.
    pub(super) registration_order: Vec<ContextId>,
    /// When-contexts per actor, for externally triggered starts.
    pub(super) when_contexts: HashMap<ActorId, Vec<ContextId>>,
    /// Contexts eligible to run, per actor.
    pub(super) scheduled: IndexMap<ActorId, Vec<ContextId>>,
    /// Triggered contexts waiting to be promoted into `scheduled`.
    pub(super) pending: IndexMap<ActorId, Vec<ContextId>>,
    /// Raised whenever a context is newly scheduled or promoted.
    pub(super) new_work: bool,
    /// Raised when a pass must run before control returns to the driver.
    pub(super) pass_requested: bool,
    pub(super) wait_pool: WorkerPool,
    pub(super) buffer_pool: WorkerPool,
    pub(super) effects: EffectQueue,
    pub(super) events_tx: Sender<ControlEvent>,
    pub(super) events_rx: Receiver<ControlEvent>,
    pub(super) metrics: SchedulerMetrics,
}

impl Scheduler {
    /// Create a scheduler bound to the current thread.
    pub fn new(
        config: SchedulerConfig,
        broadcasts: Arc<dyn BroadcastHandler>,
    ) -> Result<Self, SchedulerError> {
        let wait_pool = WorkerPool::new(format!("{}-wait", config.lane_name_prefix));
        let buffer_pool = WorkerPool::new(format!("{}-buffer", config.lane_name_prefix));
        buffer_pool.seed(config.initial_buffer_lanes)?;
        let effects = EffectQueue::new(config.effect_queue_name.clone())?;
        let (events_tx, events_rx) = control::channel();

        Ok(Self {
            config,
            running: false,
            control_thread: thread::current().id(),
            broadcasts,
            actors: IndexMap::new(),
            contexts: HashMap::new(),
            registration_order: Vec::new(),
            when_contexts: HashMap::new(),
            scheduled: IndexMap::new(),
            pending: IndexMap::new(),
            new_work: false,
            pass_requested: false,
            wait_pool,
            buffer_pool,
            effects,
            events_tx,
            events_rx,
            metrics: SchedulerMetrics::default(),
        })
    }

    pub(super) fn ensure_control_thread(&self) -> Result<(), SchedulerError> {
        if thread::current().id() == self.control_thread {
            Ok(())
        } else {
            Err(SchedulerError::WrongThread)
        }
    }

    // ── Registration ────────────────────────────────────────────

    /// Register an actor and the surface its actions run on.
    pub fn register_actor(&mut self, surface: Box<dyn ActorSurface>) -> Result<(), SchedulerError> {
        self.ensure_control_thread()?;
        let name = surface.name();
        if name.is_empty() {
            return Err(SchedulerError::UnnamedActor);
        }
        let id = ActorId::from(name);
        if self.actors.contains_key(&id) {
            return Err(SchedulerError::DuplicateActor(id));
        }
        info!(actor = %id, "registered actor");
        self.actors.insert(id, surface);
        Ok(())
    }

    /// Register a context. Its actor must already be registered.
    pub fn register_context(&mut self, context: ScriptContext) -> Result<ContextId, SchedulerError> {
        self.ensure_control_thread()?;
        let id = context.id();
        if self.contexts.contains_key(&id) {
            return Err(SchedulerError::DuplicateContext(id));
        }
        let actor = context.actor().clone();
        if !self.actors.contains_key(&actor) {
            return Err(SchedulerError::UnknownActor(actor));
        }

        if context.kind() == ContextKind::When {
            self.registration_order.insert(0, id);
            self.when_contexts.entry(actor).or_default().push(id);
        } else {
            self.registration_order.push(id);
        }
        self.contexts.insert(id, context);
        Ok(id)
    }

    // ── Queries ─────────────────────────────────────────────────

    /// Whether `context` is in its actor's scheduled set.
    pub fn is_scheduled(&self, context: ContextId) -> bool {
        self.contexts
            .get(&context)
            .and_then(|ctx| self.scheduled.get(ctx.actor()))
            .is_some_and(|ids| ids.contains(&context))
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn context(&self, id: ContextId) -> Option<&ScriptContext> {
        self.contexts.get(&id)
    }

    pub fn context_state(&self, id: ContextId) -> Option<ContextState> {
        self.contexts.get(&id).map(ScriptContext::state)
    }

    pub fn context_generation(&self, id: ContextId) -> Option<u64> {
        self.contexts.get(&id).map(ScriptContext::generation)
    }

    /// Scheduled contexts of `actor`, in visiting order.
    pub fn scheduled_contexts(&self, actor: &str) -> &[ContextId] {
        self.scheduled.get(actor).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Contexts of `actor` triggered but not yet promoted.
    pub fn pending_contexts(&self, actor: &str) -> &[ContextId] {
        self.pending.get(actor).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Actors with scheduled contexts, in visiting order.
    pub fn scheduled_actors(&self) -> impl Iterator<Item = &ActorId> {
        self.scheduled
            .iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(actor, _)| actor)
    }

    /// Registered contexts in registration order.
    pub fn registered_contexts(&self) -> &[ContextId] {
        &self.registration_order
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Get a snapshot of the current scheduler metrics.
    pub fn metrics(&self) -> SchedulerMetrics {
        self.metrics.clone()
    }

    pub fn broadcasts(&self) -> Arc<dyn BroadcastHandler> {
        Arc::clone(&self.broadcasts)
    }

    pub fn wait_pool(&self) -> &WorkerPool {
        &self.wait_pool
    }

    pub fn buffer_pool(&self) -> &WorkerPool {
        &self.buffer_pool
    }

    /// The shared serial effect queue.
    pub fn effects(&self) -> &EffectQueue {
        &self.effects
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("running", &self.running)
            .field("actors", &self.actors.len())
            .field("contexts", &self.contexts.len())
            .field("scheduled", &self.scheduled)
            .field("pending", &self.pending)
            .finish()
    }
}
