//! Broadcast dispatch: which scripts a message starts, and who waits for them.

use std::sync::{PoisonError, RwLock};

use indexmap::IndexMap;
use stage_core::ContextId;
use tracing::debug;

use super::error::SchedulerError;
use super::runner::Scheduler;

/// Whether the sender keeps going or waits for the receivers to finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastMode {
    /// Fire and forget. The sending closure resumes its own script.
    Plain,
    /// The sender is parked until every receiver has finished.
    AndWait,
}

/// Resolves messages to receiving contexts and tracks sender/receiver waits.
///
/// Methods that take the scheduler are called on the control thread, possibly
/// from inside a scheduling pass.
pub trait BroadcastHandler: Send + Sync {
    /// Called when the scheduler starts.
    fn setup(&self);

    /// Called on scheduler shutdown.
    fn tear_down(&self);

    /// Start every receiver of `message` on behalf of `sender`.
    fn perform_broadcast(
        &self,
        message: &str,
        sender: ContextId,
        mode: BroadcastMode,
        scheduler: &mut Scheduler,
    ) -> Result<(), SchedulerError>;

    /// Stop the receivers `sender` is still waiting on and forget the wait.
    /// Used before `sender` is restarted.
    fn terminate_waiting_receivers_of(
        &self,
        sender: ContextId,
        scheduler: &mut Scheduler,
    ) -> Result<(), SchedulerError>;

    /// `receiver` finished. Resume every sender that has nothing left to wait on.
    fn wake_senders_waiting_on(
        &self,
        receiver: ContextId,
        scheduler: &mut Scheduler,
    ) -> Result<(), SchedulerError>;
}

/// In-memory [`BroadcastHandler`] backed by a subscription table.
#[derive(Debug, Default)]
pub struct BroadcastRegistry {
    /// Message -> receiving broadcast contexts, in subscription order.
    receivers: RwLock<IndexMap<String, Vec<ContextId>>>,
    /// Sender -> receivers it is still waiting on.
    waiting: RwLock<IndexMap<ContextId, Vec<ContextId>>>,
}

impl BroadcastRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `context` a receiver of `message`.
    pub fn subscribe(&self, message: impl Into<String>, context: ContextId) {
        let mut receivers = self.receivers.write().unwrap_or_else(PoisonError::into_inner);
        let entry = receivers.entry(message.into()).or_default();
        if !entry.contains(&context) {
            entry.push(context);
        }
    }

    /// Receivers of `message`, in subscription order.
    pub fn receivers_of(&self, message: &str) -> Vec<ContextId> {
        self.receivers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(message)
            .cloned()
            .unwrap_or_default()
    }

    /// Receivers `sender` is still waiting on.
    pub fn awaited_by(&self, sender: ContextId) -> Vec<ContextId> {
        self.waiting
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&sender)
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_waiting(&self, sender: ContextId) -> bool {
        self.waiting
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&sender)
    }
}

impl BroadcastHandler for BroadcastRegistry {
    fn setup(&self) {
        self.waiting.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn tear_down(&self) {
        self.waiting.write().unwrap_or_else(PoisonError::into_inner).clear();
        self.receivers.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn perform_broadcast(
        &self,
        message: &str,
        sender: ContextId,
        mode: BroadcastMode,
        scheduler: &mut Scheduler,
    ) -> Result<(), SchedulerError> {
        let targets = self.receivers_of(message);
        debug!(message, receivers = targets.len(), ?mode, "broadcast");

        if mode == BroadcastMode::AndWait {
            if targets.is_empty() {
                return scheduler.resume_context(sender);
            }
            self.waiting
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(sender, targets.clone());
            scheduler.mark_waiting(sender)?;
        }

        scheduler.start_broadcast_contexts(&targets)
    }

    fn terminate_waiting_receivers_of(
        &self,
        sender: ContextId,
        scheduler: &mut Scheduler,
    ) -> Result<(), SchedulerError> {
        let awaited = self
            .waiting
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .shift_remove(&sender);
        for receiver in awaited.unwrap_or_default() {
            scheduler.stop_context(receiver, false)?;
        }
        Ok(())
    }

    fn wake_senders_waiting_on(
        &self,
        receiver: ContextId,
        scheduler: &mut Scheduler,
    ) -> Result<(), SchedulerError> {
        let woken: Vec<ContextId> = {
            let mut waiting = self.waiting.write().unwrap_or_else(PoisonError::into_inner);
            for awaited in waiting.values_mut() {
                awaited.retain(|id| *id != receiver);
            }
            let done: Vec<ContextId> = waiting
                .iter()
                .filter(|(_, awaited)| awaited.is_empty())
                .map(|(sender, _)| *sender)
                .collect();
            waiting.retain(|_, awaited| !awaited.is_empty());
            done
        };

        for sender in woken {
            debug!(%sender, %receiver, "waking broadcast sender");
            scheduler.resume_context(sender)?;
        }
        Ok(())
    }
}
