pub mod scheduler;

pub use scheduler::{
    Action, ActionCompletion, ActorAction, ActorSurface, BroadcastHandler, BroadcastMode,
    BroadcastRegistry, ContextKind, ContextState, DurationSpec, EffectQueue, Instruction,
    InstructionKind, PoolError, PoolKind, Scheduler, SchedulerError, SchedulerMetrics, Script,
    ScriptContext, SequenceScript, TimedAction, WorkerPool,
};
pub use stage_core::{ActorId, ContextId, SchedulerConfig};
