//! Messages marshaled onto the control thread.
//!
//! Background lanes and actor surfaces never touch scheduler state. They post
//! one of these and the control thread applies it during `pump`.

use crossbeam_channel::{Receiver, Sender};
use stage_core::{ActorId, ContextId};

use super::types::PoolKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ControlEvent {
    /// An actor finished a (possibly merged) action.
    ActionFinished {
        actor: ActorId,
        /// Contexts in the action with the generation each was submitted under.
        contexts: Vec<(ContextId, u64)>,
    },
    /// A background step finished.
    Rejoin {
        context: ContextId,
        generation: u64,
        pool: PoolKind,
    },
}

pub(crate) fn channel() -> (Sender<ControlEvent>, Receiver<ControlEvent>) {
    crossbeam_channel::unbounded()
}
