use serde::{Deserialize, Serialize};

/// Execution state of a script context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContextState {
    /// Eligible to advance on the next pass.
    Runnable,
    /// Advanced this pass; its step is in flight.
    Running,
    /// Parked until the broadcasts it sent have finished.
    Waiting,
    /// Finished, stopped, or torn down.
    Dead,
}

/// What triggers a script. Affects visiting order and termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContextKind {
    /// Started only through an explicit `schedule_context`.
    Ordinary,
    /// Started when the program runs.
    Start,
    /// Started by an external condition; visited ahead of its actor's other scripts.
    When,
    /// Started by a broadcast message; wakes waiting senders when it finishes.
    Broadcast,
}

/// Which background pool a step was sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolKind {
    /// Blocking "wait" steps.
    Wait,
    /// Formula pre-evaluation steps.
    Buffer,
}

impl PoolKind {
    pub fn label(&self) -> &'static str {
        match self {
            PoolKind::Wait => "wait",
            PoolKind::Buffer => "buffer",
        }
    }
}

/// Instruction tag, used for logging and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstructionKind {
    HighPriorityClosure,
    Closure,
    LongDurationAction,
    WaitClosure,
    Action,
    FormulaBuffer,
    ConditionalFormulaBuffer,
    Invalid,
}
