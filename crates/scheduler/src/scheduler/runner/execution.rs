use stage_core::{ActorId, ContextId};
use tracing::{debug, trace};

use crate::scheduler::control::ControlEvent;
use crate::scheduler::error::SchedulerError;
use crate::scheduler::instruction::{
    ActionFactory, BackgroundTask, Closure, DurationSpec, HighPriorityClosure, Instruction,
};
use crate::scheduler::surface::{Action, ActionCompletion};
use crate::scheduler::types::{ContextState, PoolKind};

use super::Scheduler;

/// Steps collected from every actor during one pass.
#[derive(Default)]
struct PassBuckets {
    closures: Vec<(ContextId, Closure)>,
    high_priority: Vec<(ContextId, HighPriorityClosure)>,
    waits: Vec<(ContextId, u64, BackgroundTask)>,
    buffers: Vec<(ContextId, u64, BackgroundTask)>,
}

/// Steps one actor yielded during one pass.
#[derive(Default)]
struct ActorSteps {
    actions: Vec<(ContextId, u64, Action)>,
    long_actions: Vec<(ContextId, u64, DurationSpec, ActionFactory)>,
    took_step: bool,
}

impl Scheduler {
    /// Advance every runnable scheduled context by one step and dispatch the
    /// steps to where they run.
    pub(super) fn run_pass(&mut self) -> Result<(), SchedulerError> {
        if !self.running {
            return Ok(());
        }
        self.metrics.passes += 1;

        let mut buckets = PassBuckets::default();
        let actors: Vec<ActorId> = self.scheduled.keys().cloned().collect();
        for actor in actors {
            if !self.actors.contains_key(&actor) {
                return Err(SchedulerError::UnknownActor(actor));
            }
            let steps = self.collect_actor_steps(&actor, &mut buckets)?;
            self.submit_actor_steps(&actor, steps)?;
        }

        for (id, generation, task) in buckets.waits {
            self.dispatch_background(id, generation, PoolKind::Wait, task)?;
        }

        let ran_closures = !buckets.closures.is_empty();
        for (id, closure) in buckets.closures {
            closure(id, self)?;
        }

        for (id, generation, task) in buckets.buffers {
            self.dispatch_background(id, generation, PoolKind::Buffer, task)?;
        }

        if ran_closures && buckets.high_priority.is_empty() {
            self.pass_requested = true;
            return Ok(());
        }

        let handler = self.broadcasts();
        for (id, closure) in buckets.high_priority {
            closure(id, self, handler.as_ref())?;
        }
        Ok(())
    }

    fn collect_actor_steps(
        &mut self,
        actor: &ActorId,
        buckets: &mut PassBuckets,
    ) -> Result<ActorSteps, SchedulerError> {
        let mut steps = ActorSteps::default();
        let ids = self.scheduled.get(actor).cloned().unwrap_or_default();

        for id in ids {
            let Some(ctx) = self.contexts.get_mut(&id) else {
                continue;
            };
            if ctx.state() != ContextState::Runnable {
                continue;
            }
            ctx.set_state(ContextState::Running);
            let generation = ctx.generation();

            let Some(instruction) = ctx.next_instruction() else {
                debug!(%actor, script = ctx.name(), context = %id, "script finished");
                self.stop_context(id, true)?;
                steps.took_step = true;
                continue;
            };
            self.metrics.record_step(instruction.kind());
            trace!(%actor, context = %id, step = ?instruction, "step");

            match instruction {
                Instruction::Invalid => {
                    ctx.set_state(ContextState::Runnable);
                    continue;
                }
                Instruction::Action(action) => steps.actions.push((id, generation, action)),
                Instruction::LongDurationAction { duration, build } => {
                    steps.long_actions.push((id, generation, duration, build))
                }
                Instruction::Closure(f) => buckets.closures.push((id, f)),
                Instruction::HighPriorityClosure(f) => buckets.high_priority.push((id, f)),
                Instruction::WaitClosure(task) => buckets.waits.push((id, generation, task)),
                Instruction::FormulaBuffer(task) | Instruction::ConditionalFormulaBuffer(task) => {
                    buckets.buffers.push((id, generation, task))
                }
            }
            steps.took_step = true;
        }
        Ok(steps)
    }

    fn submit_actor_steps(&mut self, actor: &ActorId, steps: ActorSteps) -> Result<(), SchedulerError> {
        let has_actions = !steps.actions.is_empty() || !steps.long_actions.is_empty();

        if !steps.actions.is_empty() {
            let mut contexts = Vec::with_capacity(steps.actions.len());
            let mut actions = Vec::with_capacity(steps.actions.len());
            for (id, generation, action) in steps.actions {
                contexts.push((id, generation));
                actions.push(action);
            }
            let merged = actions.len();
            if let Some(action) = Action::merge(actions) {
                self.metrics.record_action_submission(merged);
                debug!(%actor, merged, "submitting action");
                self.submit(actor, action, contexts)?;
            }
        }

        for (id, generation, duration, build) in steps.long_actions {
            let duration = duration.resolve();
            let action = build(duration);
            self.metrics.long_action_submissions += 1;
            debug!(%actor, context = %id, ?duration, "submitting long action");
            self.submit(actor, action, vec![(id, generation)])?;
        }

        if !has_actions && steps.took_step {
            self.schedule_broadcast_receivers(actor, false)?;
        }
        Ok(())
    }

    fn submit(
        &mut self,
        actor: &ActorId,
        action: Action,
        contexts: Vec<(ContextId, u64)>,
    ) -> Result<(), SchedulerError> {
        let completion = ActionCompletion::new(actor.clone(), contexts, self.events_tx.clone());
        let surface = self
            .actors
            .get_mut(actor)
            .ok_or_else(|| SchedulerError::UnknownActor(actor.clone()))?;
        surface.run(action, completion);
        Ok(())
    }

    fn dispatch_background(
        &mut self,
        context: ContextId,
        generation: u64,
        pool: PoolKind,
        task: BackgroundTask,
    ) -> Result<(), SchedulerError> {
        let events = self.events_tx.clone();
        let done = move || {
            let _ = events.send(ControlEvent::Rejoin {
                context,
                generation,
                pool,
            });
        };
        let lanes = match pool {
            PoolKind::Wait => &self.wait_pool,
            PoolKind::Buffer => &self.buffer_pool,
        };
        lanes.dispatch(task, done)?;
        self.metrics.record_dispatch(pool);
        Ok(())
    }
}
