use std::collections::HashMap;

use indexmap::IndexMap;
use stage_core::{ActorId, ContextId};
use tracing::{debug, info};

use crate::scheduler::context::ScriptContext;
use crate::scheduler::error::SchedulerError;
use crate::scheduler::types::{ContextKind, ContextState};

use super::Scheduler;

/// Append `id` to `actor`'s sequence in `set` unless it is already there.
/// When-contexts go ahead of every non-When context. Returns whether it was added.
fn enqueue(
    set: &mut IndexMap<ActorId, Vec<ContextId>>,
    contexts: &HashMap<ContextId, ScriptContext>,
    actor: &ActorId,
    id: ContextId,
    kind: ContextKind,
) -> bool {
    let ids = set.entry(actor.clone()).or_default();
    if ids.contains(&id) {
        return false;
    }
    if kind == ContextKind::When {
        let at = ids
            .iter()
            .position(|other| {
                contexts
                    .get(other)
                    .map_or(true, |ctx| ctx.kind() != ContextKind::When)
            })
            .unwrap_or(ids.len());
        ids.insert(at, id);
    } else {
        ids.push(id);
    }
    true
}

impl Scheduler {
    /// Reset `context` and put it in its actor's scheduled set.
    pub fn schedule_context(&mut self, context: ContextId) -> Result<(), SchedulerError> {
        self.ensure_control_thread()?;
        let (actor, kind) = self.reset_context(context)?;
        enqueue(&mut self.scheduled, &self.contexts, &actor, context, kind);
        self.new_work = true;
        Ok(())
    }

    /// Reset `context` and park it in its actor's pending set until the
    /// actor's current step finishes. Raises the new-work flag when the
    /// context was not already pending.
    pub fn put_on_hold(&mut self, context: ContextId) -> Result<(), SchedulerError> {
        self.ensure_control_thread()?;
        let (actor, kind) = self.reset_context(context)?;
        if enqueue(&mut self.pending, &self.contexts, &actor, context, kind) {
            self.new_work = true;
        }
        Ok(())
    }

    fn reset_context(&mut self, id: ContextId) -> Result<(ActorId, ContextKind), SchedulerError> {
        let ctx = self
            .contexts
            .get_mut(&id)
            .ok_or(SchedulerError::UnknownContext(id))?;
        ctx.reset();
        info!(
            actor = %ctx.actor(),
            script = ctx.name(),
            context = %id,
            generation = ctx.generation(),
            "starting script"
        );
        Ok((ctx.actor().clone(), ctx.kind()))
    }

    /// Move `actor`'s pending contexts into its scheduled set. With
    /// `sweep_others`, also promote every actor whose scheduled set is empty.
    pub fn schedule_broadcast_receivers(
        &mut self,
        actor: &ActorId,
        sweep_others: bool,
    ) -> Result<(), SchedulerError> {
        self.ensure_control_thread()?;
        self.scheduled.entry(actor.clone()).or_default();
        self.promote_pending(actor);
        if sweep_others {
            self.promote_idle_pending(false);
        }
        Ok(())
    }

    /// Promote the pending contexts of every idle actor, in pending insertion
    /// order. An actor is idle when nothing is scheduled on it, or, with
    /// `parked_is_idle`, when none of its scheduled contexts is Runnable or
    /// Running. Returns whether anything moved.
    pub(super) fn promote_idle_pending(&mut self, parked_is_idle: bool) -> bool {
        let idle: Vec<ActorId> = self
            .pending
            .iter()
            .filter(|(actor, ids)| !ids.is_empty() && self.is_idle(actor, parked_is_idle))
            .map(|(actor, _)| actor.clone())
            .collect();

        let mut moved = false;
        for actor in &idle {
            moved |= self.promote_pending(actor);
        }
        moved
    }

    fn is_idle(&self, actor: &ActorId, parked_is_idle: bool) -> bool {
        let scheduled = self.scheduled_contexts(actor.as_str());
        if !parked_is_idle {
            return scheduled.is_empty();
        }
        scheduled.iter().all(|id| {
            !matches!(
                self.context_state(*id),
                Some(ContextState::Runnable | ContextState::Running)
            )
        })
    }

    fn promote_pending(&mut self, actor: &ActorId) -> bool {
        let Some(waiting) = self.pending.get_mut(actor) else {
            return false;
        };
        let waiting = std::mem::take(waiting);
        let mut moved = false;
        for id in waiting {
            let Some(kind) = self.contexts.get(&id).map(ScriptContext::kind) else {
                continue;
            };
            if enqueue(&mut self.scheduled, &self.contexts, actor, id, kind) {
                self.metrics.promotions += 1;
                moved = true;
            }
        }
        if moved {
            debug!(%actor, "promoted pending contexts");
            self.new_work = true;
        }
        moved
    }

    /// Start broadcast receivers. A receiver that is still running first has
    /// the receivers it awaits stopped, then is restarted.
    pub fn start_broadcast_contexts(&mut self, contexts: &[ContextId]) -> Result<(), SchedulerError> {
        self.ensure_control_thread()?;
        for &id in contexts {
            let state = self
                .context_state(id)
                .ok_or(SchedulerError::UnknownContext(id))?;
            if matches!(state, ContextState::Running | ContextState::Waiting) {
                let handler = self.broadcasts();
                handler.terminate_waiting_receivers_of(id, self)?;
            }
            self.put_on_hold(id)?;
            // Already scheduled: the reset context runs on the next pass.
            if self.is_scheduled(id) {
                self.pass_requested = true;
            }
        }
        Ok(())
    }

    /// Stop `context`. A broadcast receiver wakes its waiting senders when
    /// `notify_waiting_senders` is set. Stopping a Dead context does nothing.
    pub fn stop_context(
        &mut self,
        context: ContextId,
        notify_waiting_senders: bool,
    ) -> Result<(), SchedulerError> {
        self.ensure_control_thread()?;
        let ctx = self
            .contexts
            .get_mut(&context)
            .ok_or(SchedulerError::UnknownContext(context))?;
        if ctx.state() == ContextState::Dead {
            return Ok(());
        }
        ctx.set_state(ContextState::Dead);
        let actor = ctx.actor().clone();
        let kind = ctx.kind();
        self.metrics.contexts_stopped += 1;
        debug!(%actor, context = %context, "context stopped");

        if kind == ContextKind::Broadcast && notify_waiting_senders {
            let handler = self.broadcasts();
            handler.wake_senders_waiting_on(context, self)?;
        }

        if let Some(ids) = self.scheduled.get_mut(&actor) {
            ids.retain(|id| *id != context);
        }
        if let Some(ids) = self.pending.get_mut(&actor) {
            ids.retain(|id| *id != context);
        }
        Ok(())
    }

    /// Let `context` take its next step on the coming pass.
    pub fn resume_context(&mut self, context: ContextId) -> Result<(), SchedulerError> {
        self.ensure_control_thread()?;
        let ctx = self
            .contexts
            .get_mut(&context)
            .ok_or(SchedulerError::UnknownContext(context))?;
        if ctx.state() == ContextState::Dead {
            return Ok(());
        }
        ctx.set_state(ContextState::Runnable);
        self.pass_requested = true;
        Ok(())
    }

    /// Park `context` until something resumes it.
    pub fn mark_waiting(&mut self, context: ContextId) -> Result<(), SchedulerError> {
        self.ensure_control_thread()?;
        let ctx = self
            .contexts
            .get_mut(&context)
            .ok_or(SchedulerError::UnknownContext(context))?;
        if ctx.state() != ContextState::Dead {
            ctx.set_state(ContextState::Waiting);
        }
        Ok(())
    }
}
