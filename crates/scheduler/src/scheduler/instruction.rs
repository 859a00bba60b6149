//! Steps a script can yield to the scheduler.
//!
//! The scheduler never looks inside a payload. It only uses the variant to
//! decide where the step runs: inline on the control thread, on the actor's
//! own surface, or on one of the background pools.

use std::fmt;
use std::time::Duration;

use stage_core::ContextId;

use super::broadcast::BroadcastHandler;
use super::error::SchedulerError;
use super::runner::Scheduler;
use super::surface::Action;
use super::types::InstructionKind;

/// Runs inline on the control thread. Usually ends with
/// [`Scheduler::resume_context`] so the script keeps going.
pub type Closure = Box<dyn FnOnce(ContextId, &mut Scheduler) -> Result<(), SchedulerError>>;

/// Runs inline after everything else in the pass, with access to the
/// broadcast dispatcher.
pub type HighPriorityClosure =
    Box<dyn FnOnce(ContextId, &mut Scheduler, &dyn BroadcastHandler) -> Result<(), SchedulerError>>;

/// Runs on a background lane. Must not touch scheduler state.
pub type BackgroundTask = Box<dyn FnOnce() + Send>;

/// Builds the action of a long-duration step once its duration is known.
pub type ActionFactory = Box<dyn FnOnce(Duration) -> Action>;

/// How long a long-duration action lasts.
pub enum DurationSpec {
    Fixed(Duration),
    /// Seconds, evaluated against the actor's state when the step is dispatched.
    Formula(Box<dyn FnOnce() -> f64>),
}

impl DurationSpec {
    /// Resolve to a concrete duration. Negative or non-finite values become zero.
    pub fn resolve(self) -> Duration {
        match self {
            DurationSpec::Fixed(duration) => duration,
            DurationSpec::Formula(formula) => {
                Duration::try_from_secs_f64(formula()).unwrap_or(Duration::ZERO)
            }
        }
    }
}

/// One step of a script.
pub enum Instruction {
    HighPriorityClosure(HighPriorityClosure),
    Closure(Closure),
    LongDurationAction {
        duration: DurationSpec,
        build: ActionFactory,
    },
    WaitClosure(BackgroundTask),
    Action(Action),
    FormulaBuffer(BackgroundTask),
    ConditionalFormulaBuffer(BackgroundTask),
    /// Not ready yet; the context is retried on the next pass.
    Invalid,
}

impl Instruction {
    pub fn closure<F>(f: F) -> Self
    where
        F: FnOnce(ContextId, &mut Scheduler) -> Result<(), SchedulerError> + 'static,
    {
        Instruction::Closure(Box::new(f))
    }

    pub fn high_priority<F>(f: F) -> Self
    where
        F: FnOnce(ContextId, &mut Scheduler, &dyn BroadcastHandler) -> Result<(), SchedulerError>
            + 'static,
    {
        Instruction::HighPriorityClosure(Box::new(f))
    }

    pub fn wait<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Instruction::WaitClosure(Box::new(f))
    }

    pub fn formula_buffer<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Instruction::FormulaBuffer(Box::new(f))
    }

    pub fn conditional_buffer<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Instruction::ConditionalFormulaBuffer(Box::new(f))
    }

    pub fn long_action<F>(duration: DurationSpec, build: F) -> Self
    where
        F: FnOnce(Duration) -> Action + 'static,
    {
        Instruction::LongDurationAction {
            duration,
            build: Box::new(build),
        }
    }

    pub fn kind(&self) -> InstructionKind {
        match self {
            Instruction::HighPriorityClosure(_) => InstructionKind::HighPriorityClosure,
            Instruction::Closure(_) => InstructionKind::Closure,
            Instruction::LongDurationAction { .. } => InstructionKind::LongDurationAction,
            Instruction::WaitClosure(_) => InstructionKind::WaitClosure,
            Instruction::Action(_) => InstructionKind::Action,
            Instruction::FormulaBuffer(_) => InstructionKind::FormulaBuffer,
            Instruction::ConditionalFormulaBuffer(_) => InstructionKind::ConditionalFormulaBuffer,
            Instruction::Invalid => InstructionKind::Invalid,
        }
    }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Action(action) => f.debug_tuple("Action").field(action).finish(),
            other => write!(f, "{:?}", other.kind()),
        }
    }
}
