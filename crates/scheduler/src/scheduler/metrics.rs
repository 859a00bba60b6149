use std::collections::HashMap;

use serde::Serialize;

use super::types::{InstructionKind, PoolKind};

/// Scheduler counters, snapshot via [`Scheduler::metrics`](super::Scheduler::metrics).
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetrics {
    /// Scheduling passes that actually ran (not counting no-ops while paused).
    pub passes: u64,
    /// Steps advanced, by instruction kind.
    pub steps: HashMap<InstructionKind, u64>,
    /// Submissions to actor surfaces (merged groups count once).
    pub action_submissions: u64,
    /// Largest number of actions merged into one submission.
    pub largest_action_group: usize,
    /// Long-duration actions submitted.
    pub long_action_submissions: u64,
    /// Background steps dispatched, by pool.
    pub background_dispatched: HashMap<PoolKind, u64>,
    /// Background or action completions dropped because the context moved on.
    pub stale_completions: u64,
    /// Contexts that reached Dead.
    pub contexts_stopped: u64,
    /// Pending broadcast contexts promoted into the scheduled set.
    pub promotions: u64,
}

impl SchedulerMetrics {
    pub fn record_step(&mut self, kind: InstructionKind) {
        *self.steps.entry(kind).or_default() += 1;
    }

    pub fn record_action_submission(&mut self, merged: usize) {
        self.action_submissions += 1;
        self.largest_action_group = self.largest_action_group.max(merged);
    }

    pub fn record_dispatch(&mut self, pool: PoolKind) {
        *self.background_dispatched.entry(pool).or_default() += 1;
    }

    /// Steps of `kind` advanced so far.
    pub fn steps_of(&self, kind: InstructionKind) -> u64 {
        self.steps.get(&kind).copied().unwrap_or_default()
    }
}
