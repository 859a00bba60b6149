//! Cooperative script scheduler for actor-based visual programs.
//!
//! Every registered script runs as a [`ScriptContext`] owned by one actor.
//! A pass advances each runnable context by one step and sends the step to
//! where it executes: the actor's own surface for actions, a background
//! [`WorkerPool`] lane for waits and formula evaluation, or inline on the
//! control thread for closures. Completions come back to the control thread
//! through [`Scheduler::pump`].

pub mod broadcast;
pub mod context;
pub(crate) mod control;
pub mod effects;
pub mod error;
pub mod instruction;
pub mod metrics;
pub mod pool;
pub mod runner;
pub mod surface;
pub mod types;

pub use broadcast::{BroadcastHandler, BroadcastMode, BroadcastRegistry};
pub use context::{Script, ScriptContext, SequenceScript, StepFactory};
pub use effects::EffectQueue;
pub use error::{PoolError, SchedulerError};
pub use instruction::{DurationSpec, Instruction};
pub use metrics::SchedulerMetrics;
pub use pool::WorkerPool;
pub use runner::Scheduler;
pub use surface::{Action, ActionCompletion, ActorAction, ActorSurface, TimedAction};
pub use types::{ContextKind, ContextState, InstructionKind, PoolKind};
