use stage_core::{ActorId, ContextId};

/// Precondition violations raised by the scheduler.
///
/// None of these are recoverable: they mean the caller broke an invariant the
/// scheduling tables depend on, and the program should stop.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("actor has no name")]
    UnnamedActor,
    #[error("actor already registered: {0}")]
    DuplicateActor(ActorId),
    #[error("actor not registered: {0}")]
    UnknownActor(ActorId),
    #[error("context already registered: {0}")]
    DuplicateContext(ContextId),
    #[error("context not registered: {0}")]
    UnknownContext(ContextId),
    #[error("scheduler is already running")]
    AlreadyRunning,
    #[error("scheduler accessed off its control thread")]
    WrongThread,
    #[error("worker pool failure: {0}")]
    Pool(#[from] PoolError),
}

/// Errors from the background lane pools.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("failed to spawn lane {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("lane {0} exited before accepting work")]
    LaneClosed(String),
}
