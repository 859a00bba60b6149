use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use stage_core::ContextId;
use tracing::{debug, info};

use crate::scheduler::control::ControlEvent;
use crate::scheduler::error::SchedulerError;
use crate::scheduler::types::{ContextKind, ContextState};

use super::Scheduler;

impl Scheduler {
    /// Start every Start script and run until no more work is immediately
    /// available.
    pub fn run(&mut self) -> Result<(), SchedulerError> {
        self.ensure_control_thread()?;
        if self.running {
            return Err(SchedulerError::AlreadyRunning);
        }
        info!(
            actors = self.actors.len(),
            contexts = self.contexts.len(),
            ">>> scheduler started"
        );
        self.running = true;
        self.wait_pool.seed(self.config.initial_wait_lanes)?;
        self.broadcasts.setup();

        let starts: Vec<ContextId> = self
            .registration_order
            .iter()
            .copied()
            .filter(|id| {
                self.contexts
                    .get(id)
                    .is_some_and(|ctx| ctx.kind() == ContextKind::Start)
            })
            .collect();
        for id in starts {
            self.schedule_context(id)?;
        }
        self.pass_requested = true;
        self.settle()
    }

    /// Start the When scripts of `actor` (e.g. after a tap).
    pub fn start_when_contexts_of_actor(&mut self, actor: &str) -> Result<(), SchedulerError> {
        self.ensure_control_thread()?;
        let ids = self.when_contexts.get(actor).cloned().unwrap_or_default();
        debug!(actor, count = ids.len(), "starting when scripts");
        for id in ids {
            self.schedule_context(id)?;
        }
        self.settle()
    }

    /// Stop issuing passes. Scheduling state is kept.
    pub fn pause(&mut self) -> Result<(), SchedulerError> {
        self.ensure_control_thread()?;
        self.running = false;
        self.effects.suspend();
        info!("scheduler paused");
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), SchedulerError> {
        self.ensure_control_thread()?;
        if self.running {
            return Ok(());
        }
        info!("scheduler resumed");
        self.running = true;
        self.pass_requested = true;
        self.settle()?;
        self.effects.resume();
        Ok(())
    }

    /// Stop every script and forget all actors, contexts and broadcast state.
    pub fn shutdown(&mut self) -> Result<(), SchedulerError> {
        self.ensure_control_thread()?;
        self.effects.cancel_all();
        self.effects.resume();

        let scheduled: Vec<ContextId> = self.scheduled.values().flatten().copied().collect();
        for id in scheduled {
            self.stop_context(id, false)?;
        }

        self.scheduled.clear();
        self.pending.clear();
        self.when_contexts.clear();
        self.registration_order.clear();
        self.contexts.clear();
        self.actors.clear();
        self.broadcasts.tear_down();
        self.running = false;
        self.pass_requested = false;
        self.new_work = false;
        info!("<<< scheduler shut down");
        Ok(())
    }

    /// Apply every completion already delivered to the control thread, then
    /// settle any work scheduled since the last pass. Returns the number of
    /// events handled.
    pub fn pump(&mut self) -> Result<usize, SchedulerError> {
        self.ensure_control_thread()?;
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event)?;
            handled += 1;
        }
        self.settle()?;
        Ok(handled)
    }

    /// Like [`pump`](Self::pump), but first waits up to `timeout` for an event.
    pub fn pump_timeout(&mut self, timeout: Duration) -> Result<usize, SchedulerError> {
        self.ensure_control_thread()?;
        match self.events_rx.recv_timeout(timeout) {
            Ok(event) => {
                self.handle_event(event)?;
                Ok(1 + self.pump()?)
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => Ok(0),
        }
    }

    fn handle_event(&mut self, event: ControlEvent) -> Result<(), SchedulerError> {
        match event {
            ControlEvent::ActionFinished { actor, contexts } => {
                for (id, generation) in contexts {
                    self.rejoin(id, generation);
                }
                self.pass_requested = true;
                self.settle()?;
                if self.actors.contains_key(&actor) {
                    self.schedule_broadcast_receivers(&actor, true)?;
                    self.settle()?;
                }
                Ok(())
            }
            ControlEvent::Rejoin {
                context,
                generation,
                pool,
            } => {
                debug!(%context, pool = pool.label(), "background step finished");
                if self.rejoin(context, generation) {
                    self.pass_requested = true;
                    self.settle()?;
                }
                Ok(())
            }
        }
    }

    /// Make `id` runnable again if it is still on the generation the step was
    /// issued under. Stale completions are counted and dropped.
    fn rejoin(&mut self, id: ContextId, generation: u64) -> bool {
        let current = self
            .contexts
            .get_mut(&id)
            .filter(|ctx| ctx.generation() == generation && ctx.state() != ContextState::Dead);
        match current {
            Some(ctx) => {
                ctx.set_state(ContextState::Runnable);
                true
            }
            None => {
                self.metrics.stale_completions += 1;
                debug!(context = %id, generation, "dropping stale completion");
                false
            }
        }
    }

    /// Run passes until neither flag is raised and no idle actor has pending
    /// contexts left to promote. Actors whose scheduled contexts are all
    /// waiting count as idle here.
    pub(super) fn settle(&mut self) -> Result<(), SchedulerError> {
        while self.running {
            if self.pass_requested || self.new_work {
                self.pass_requested = false;
                self.new_work = false;
                self.run_pass()?;
            } else if !self.promote_idle_pending(true) {
                break;
            }
        }
        Ok(())
    }
}
